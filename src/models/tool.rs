//! Tool profiles: the four document tools share one pipeline and differ only
//! in the worker they launch and the artifact they hand back.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

const SPREADSHEET_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// One processing tool exposed under `/tools/{slug}`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    /// Expense invoices into a spreadsheet.
    Expense,
    /// Payroll receipts into a spreadsheet.
    Payroll,
    /// Sorts documents by type and repackages them as an archive.
    Classify,
    /// Checks document status against the tax authority, reported as a spreadsheet.
    Validate,
}

impl ToolKind {
    pub const ALL: [ToolKind; 4] = [
        ToolKind::Expense,
        ToolKind::Payroll,
        ToolKind::Classify,
        ToolKind::Validate,
    ];

    pub fn slug(self) -> &'static str {
        match self {
            ToolKind::Expense => "expense",
            ToolKind::Payroll => "payroll",
            ToolKind::Classify => "classify",
            ToolKind::Validate => "validate",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ToolKind::Expense => "Extract expense XML",
            ToolKind::Payroll => "Extract payroll XML",
            ToolKind::Classify => "Classify XML",
            ToolKind::Validate => "Validate XML",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ToolKind::Expense => {
                "Analyzes expense XML files and produces a spreadsheet with fiscal and accounting detail."
            }
            ToolKind::Payroll => {
                "Processes payroll XML files and produces a spreadsheet of earnings and deductions."
            }
            ToolKind::Classify => {
                "Sorts XML files by type (payroll, expense, empty) and returns them as a ZIP archive."
            }
            ToolKind::Validate => {
                "Checks the fiscal status of expense and payroll XML files and reports it as a spreadsheet."
            }
        }
    }

    /// Script file name under the configured scripts directory.
    pub fn script(self) -> &'static str {
        match self {
            ToolKind::Expense => "extractor_xml.py",
            ToolKind::Payroll => "extractor_nomina.py",
            ToolKind::Classify => "clasificador_xml.py",
            ToolKind::Validate => "validador_xml.py",
        }
    }

    /// Extension (with leading dot) the worker's result path must end in.
    pub fn output_extension(self) -> &'static str {
        match self {
            ToolKind::Classify => ".zip",
            _ => ".xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ToolKind::Classify => "application/zip",
            _ => SPREADSHEET_CONTENT_TYPE,
        }
    }

    /// Fixed filename presented in the attachment disposition.
    pub fn download_name(self) -> &'static str {
        match self {
            ToolKind::Expense => "CFDI_Procesado.xlsx",
            ToolKind::Payroll => "Nomina_Procesada.xlsx",
            ToolKind::Classify => "XML_Clasificados.zip",
            ToolKind::Validate => "Validacion_SAT.xlsx",
        }
    }

    pub fn success_message(self, with_warnings: bool) -> &'static str {
        match (self, with_warnings) {
            (ToolKind::Classify, false) => "Classification completed successfully.",
            (ToolKind::Classify, true) => "Classification completed with warnings.",
            (ToolKind::Validate, false) => "Validation report generated successfully.",
            (ToolKind::Validate, true) => "Validation report generated with warnings.",
            (_, false) => "File generated successfully.",
            (_, true) => "File generated with warnings.",
        }
    }

    /// Message for a recognized processing failure (worker exit status 1).
    pub fn processing_failure_message(self) -> &'static str {
        match self {
            ToolKind::Expense => {
                "A problem occurred while processing the XML files. Try again and review the messages."
            }
            ToolKind::Payroll => {
                "A problem occurred while processing the payroll XML files. Review the messages shown."
            }
            ToolKind::Classify => {
                "A problem occurred while classifying the XML files. Try again and review the messages."
            }
            ToolKind::Validate => {
                "A problem occurred while validating the XML files. Try again and review the messages."
            }
        }
    }

    /// Message for every other failure: spawn errors, unexpected exits, no output.
    pub fn generic_failure_message(self) -> &'static str {
        match self {
            ToolKind::Expense => "The XML files could not be processed.",
            ToolKind::Payroll => "The payroll files could not be processed.",
            ToolKind::Classify => "The XML files could not be classified.",
            ToolKind::Validate => "The XML files could not be validated.",
        }
    }
}

pub const MISSING_DEPENDENCY_MESSAGE: &str =
    "The output could not be generated because a system component is missing. Let us know so we can enable it.";

pub const TIMEOUT_MESSAGE: &str =
    "Processing took too long and was stopped. Try again with fewer files.";

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown tool `{0}`")]
pub struct UnknownTool(pub String);

impl FromStr for ToolKind {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToolKind::ALL
            .into_iter()
            .find(|tool| tool.slug().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownTool(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_round_trip_through_from_str() {
        for tool in ToolKind::ALL {
            assert_eq!(tool.slug().parse::<ToolKind>().unwrap(), tool);
        }
        assert!("nomina".parse::<ToolKind>().is_err());
    }

    #[test]
    fn classify_produces_an_archive() {
        assert_eq!(ToolKind::Classify.output_extension(), ".zip");
        assert_eq!(ToolKind::Classify.content_type(), "application/zip");
        assert_eq!(ToolKind::Payroll.output_extension(), ".xlsx");
    }
}
