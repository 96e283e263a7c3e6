use serde::{Deserialize, Serialize};

/// Every export target the panel offers, in menu order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Text,
    Markdown,
    Screenshot,
    Pdf,
    Word,
    Html,
    Json,
    Excel,
    Csv,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 9] = [
        ExportFormat::Text,
        ExportFormat::Markdown,
        ExportFormat::Screenshot,
        ExportFormat::Pdf,
        ExportFormat::Word,
        ExportFormat::Html,
        ExportFormat::Json,
        ExportFormat::Excel,
        ExportFormat::Csv,
    ];

    pub fn id(self) -> &'static str {
        match self {
            ExportFormat::Text => "text",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Screenshot => "screenshot",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Word => "word",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
            ExportFormat::Excel => "excel",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let id = id.trim();
        Self::ALL.into_iter().find(|format| format.id() == id)
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Markdown => "md",
            ExportFormat::Screenshot => "png",
            ExportFormat::Pdf => "pdf",
            ExportFormat::Word => "doc",
            ExportFormat::Html => "html",
            ExportFormat::Json => "json",
            ExportFormat::Excel => "xls",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain;charset=utf-8",
            ExportFormat::Markdown => "text/markdown;charset=utf-8",
            ExportFormat::Screenshot => "image/png",
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Word => "application/msword",
            ExportFormat::Html => "text/html;charset=utf-8",
            ExportFormat::Json => "application/json;charset=utf-8",
            ExportFormat::Excel => "application/vnd.ms-excel;charset=utf-8",
            ExportFormat::Csv => "text/csv;charset=utf-8",
        }
    }

    /// Formats built from the page snapshot rather than from turn text.
    pub fn is_visual(self) -> bool {
        matches!(
            self,
            ExportFormat::Screenshot | ExportFormat::Pdf | ExportFormat::Word | ExportFormat::Html
        )
    }

    pub fn is_raster(self) -> bool {
        matches!(self, ExportFormat::Screenshot | ExportFormat::Pdf)
    }

    /// Formats whose output embeds resolved images.
    pub fn resolves_images(self) -> bool {
        matches!(self, ExportFormat::Markdown | ExportFormat::Json)
    }
}
