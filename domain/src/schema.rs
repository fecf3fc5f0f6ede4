//! Store-agnostic schema descriptors for the goods entities.
//!
//! Adapters use these to define tables and to build the category/goods join;
//! the domain types in `lib.rs` mirror the same columns.

/// Column storage class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub column: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub nullable: bool,
}

impl FieldDef {
    const fn required(column: &'static str, sql_type: SqlType) -> Self {
        Self { column, sql_type, primary_key: false, nullable: false }
    }

    const fn optional(column: &'static str, sql_type: SqlType) -> Self {
        Self { column, sql_type, primary_key: false, nullable: true }
    }

    const fn key(column: &'static str) -> Self {
        Self { column, sql_type: SqlType::Text, primary_key: true, nullable: false }
    }
}

/// Options applied when an entity is defined against a store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelOptions {
    /// Adds `created_time` and `updated_time` columns.
    pub timestamps: bool,
    /// Use the model name as the table name instead of its plural.
    pub freeze_table_name: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntitySchema {
    pub name: &'static str,
    pub fields: &'static [FieldDef],
    pub options: ModelOptions,
}

pub const TIMESTAMP_FIELDS: [FieldDef; 2] = [
    FieldDef::required("created_time", SqlType::Integer),
    FieldDef::required("updated_time", SqlType::Integer),
];

impl EntitySchema {
    pub fn table_name(&self) -> String {
        if self.options.freeze_table_name {
            self.name.to_string()
        } else {
            pluralize(self.name)
        }
    }

    /// Declared fields followed by the timestamp columns when enabled.
    pub fn columns(&self) -> Vec<FieldDef> {
        let mut cols = self.fields.to_vec();
        if self.options.timestamps {
            cols.extend_from_slice(&TIMESTAMP_FIELDS);
        }
        cols
    }

    pub fn primary_key(&self) -> Option<&'static str> {
        self.fields.iter().find(|f| f.primary_key).map(|f| f.column)
    }
}

fn pluralize(name: &str) -> String {
    if name.ends_with('s') {
        name.to_string()
    } else if let Some(stem) = name.strip_suffix('y') {
        format!("{stem}ies")
    } else {
        format!("{name}s")
    }
}

/// One-to-many association: each parent row owns zero or more child rows
/// pointing back to it through `foreign_key`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HasMany {
    pub parent: &'static EntitySchema,
    pub child: &'static EntitySchema,
    pub foreign_key: &'static str,
}

pub static GOODS: EntitySchema = EntitySchema {
    name: "goods",
    fields: &[
        FieldDef::key("uuid"),
        FieldDef::required("org_uuid", SqlType::Text),
        FieldDef::required("category_uuid", SqlType::Text),
        FieldDef::required("name", SqlType::Text),
        FieldDef::required("price", SqlType::Integer),
        FieldDef::required("stock", SqlType::Integer),
        FieldDef::optional("description", SqlType::Text),
    ],
    options: ModelOptions { timestamps: true, freeze_table_name: false },
};

pub static GOODS_CATEGORY: EntitySchema = EntitySchema {
    name: "goodscategory",
    fields: &[
        FieldDef::key("uuid"),
        FieldDef::required("org_uuid", SqlType::Text),
        FieldDef::required("name", SqlType::Text),
        FieldDef::optional("description", SqlType::Text),
    ],
    options: ModelOptions { timestamps: false, freeze_table_name: true },
};

pub static CATEGORY_HAS_GOODS: HasMany = HasMany {
    parent: &GOODS_CATEGORY,
    child: &GOODS,
    foreign_key: "category_uuid",
};
