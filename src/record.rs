use serde::{Deserialize, Serialize};

/// Header row of every dataset, instance and checkpoint file.
pub const HEADERS: [&str; 8] = [
    "Name",
    "Company",
    "Email",
    "Office",
    "DirectLine",
    "Cell",
    "Fax",
    "PersonalFax",
];

/// One agent/contact. Unknown values are empty strings, never absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRecord {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Company", default)]
    pub company: String,
    #[serde(rename = "Email", default)]
    pub email: String,
    #[serde(rename = "Office", default)]
    pub office: String,
    #[serde(rename = "DirectLine", default)]
    pub direct_line: String,
    #[serde(rename = "Cell", default)]
    pub cell: String,
    #[serde(rename = "Fax", default)]
    pub fax: String,
    #[serde(rename = "PersonalFax", default)]
    pub personal_fax: String,
}

/// Addressable record fields, in header order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Company,
    Email,
    Office,
    DirectLine,
    Cell,
    Fax,
    PersonalFax,
}

impl Field {
    pub const ALL: [Field; 8] = [
        Field::Name,
        Field::Company,
        Field::Email,
        Field::Office,
        Field::DirectLine,
        Field::Cell,
        Field::Fax,
        Field::PersonalFax,
    ];

    pub fn header(self) -> &'static str {
        HEADERS[self as usize]
    }
}

impl ContactRecord {
    pub fn get(&self, field: Field) -> &str {
        match field {
            Field::Name => &self.name,
            Field::Company => &self.company,
            Field::Email => &self.email,
            Field::Office => &self.office,
            Field::DirectLine => &self.direct_line,
            Field::Cell => &self.cell,
            Field::Fax => &self.fax,
            Field::PersonalFax => &self.personal_fax,
        }
    }

    pub fn set(&mut self, field: Field, value: String) {
        let slot = match field {
            Field::Name => &mut self.name,
            Field::Company => &mut self.company,
            Field::Email => &mut self.email,
            Field::Office => &mut self.office,
            Field::DirectLine => &mut self.direct_line,
            Field::Cell => &mut self.cell,
            Field::Fax => &mut self.fax,
            Field::PersonalFax => &mut self.personal_fax,
        };
        *slot = value;
    }

    /// Dedup/merge key.
    pub fn key(&self) -> &str {
        self.name.trim()
    }

    /// Only records with an email are ever persisted.
    pub fn has_email(&self) -> bool {
        !self.email.trim().is_empty()
    }
}
