// SPDX-License-Identifier: Apache-2.0

//! Catalog descriptors returned by the metadata commands.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// Relation kind. Base tables sort before everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
    Table,
    View,
}

impl TableKind {
    /// Maps an `information_schema.tables.table_type` value.
    pub fn from_table_type(table_type: &str) -> Self {
        if table_type == "BASE TABLE" {
            TableKind::Table
        } else {
            TableKind::View
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TableKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    /// Access method, e.g. `btree`
    pub method: String,
    pub unique: bool,
    pub primary: bool,
    /// Key columns in index key order
    pub columns: Vec<String>,
}

/// Referential action of a foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeignKeyAction {
    #[serde(rename = "NO ACTION")]
    NoAction,
    #[serde(rename = "RESTRICT")]
    Restrict,
    #[serde(rename = "CASCADE")]
    Cascade,
    #[serde(rename = "SET NULL")]
    SetNull,
    #[serde(rename = "SET DEFAULT")]
    SetDefault,
}

impl ForeignKeyAction {
    /// Decodes `pg_constraint.confupdtype` / `confdeltype`. Unknown codes are
    /// treated as `NO ACTION`, the server default.
    pub fn from_code(code: &str) -> Self {
        match code {
            "r" => Self::Restrict,
            "c" => Self::Cascade,
            "n" => Self::SetNull,
            "d" => Self::SetDefault,
            _ => Self::NoAction,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Restrict => "RESTRICT",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    pub constraint_name: String,
    pub column_name: String,
    pub referenced_schema: String,
    pub referenced_table: String,
    pub referenced_column: String,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
}

/// Constraint kind, ordered by its `pg_constraint.contype` code.
///
/// Codes without a dedicated variant are kept as `Other` and serialized
/// as the raw code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ConstraintKind {
    Check,
    ForeignKey,
    NotNull,
    PrimaryKey,
    Trigger,
    Unique,
    Exclusion,
    Other(String),
}

impl ConstraintKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "c" => Self::Check,
            "f" => Self::ForeignKey,
            "n" => Self::NotNull,
            "p" => Self::PrimaryKey,
            "t" => Self::Trigger,
            "u" => Self::Unique,
            "x" => Self::Exclusion,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::Check => "c",
            Self::ForeignKey => "f",
            Self::NotNull => "n",
            Self::PrimaryKey => "p",
            Self::Trigger => "t",
            Self::Unique => "u",
            Self::Exclusion => "x",
            Self::Other(code) => code,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Check => "CHECK",
            Self::ForeignKey => "FOREIGN KEY",
            Self::NotNull => "NOT NULL",
            Self::PrimaryKey => "PRIMARY KEY",
            Self::Trigger => "TRIGGER",
            Self::Unique => "UNIQUE",
            Self::Exclusion => "EXCLUSION",
            Self::Other(code) => code,
        }
    }
}

impl Ord for ConstraintKind {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code()
            .cmp(other.code())
            .then_with(|| self.label().cmp(other.label()))
    }
}

impl PartialOrd for ConstraintKind {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<ConstraintKind> for String {
    fn from(kind: ConstraintKind) -> Self {
        kind.label().to_string()
    }
}

impl From<String> for ConstraintKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "CHECK" => Self::Check,
            "FOREIGN KEY" => Self::ForeignKey,
            "NOT NULL" => Self::NotNull,
            "PRIMARY KEY" => Self::PrimaryKey,
            "TRIGGER" => Self::Trigger,
            "UNIQUE" => Self::Unique,
            "EXCLUSION" => Self::Exclusion,
            _ => Self::Other(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConstraintKind,
    pub definition: String,
}
