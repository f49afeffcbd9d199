use std::fmt::{self, Display, Formatter};

use tabled::builder::Builder;
use tabled::settings::Style;

use super::painter::Painter;

/// Rounded table rendered through `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    header: Option<Vec<String>>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid<const N: usize>(header: [&str; N], rows: Vec<Vec<String>>) -> Self {
        Self {
            header: Some(Vec::from(header.map(str::to_owned))),
            rows,
        }
    }

    /// Header-less field/value listing with muted field names.
    pub(crate) fn key_value(painter: &Painter, pairs: Vec<(&str, String)>) -> Self {
        Self {
            header: None,
            rows: pairs
                .into_iter()
                .map(|(field, value)| vec![painter.muted(field), value])
                .collect(),
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        if let Some(header) = &self.header {
            builder.push_record(header);
        }
        for row in &self.rows {
            builder.push_record(row);
        }

        let mut table = builder.build();
        if self.header.is_some() {
            table.with(Style::rounded());
        } else {
            table.with(Style::rounded().remove_horizontals());
        }
        write!(f, "{table}")
    }
}
