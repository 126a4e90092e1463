//! Declarative transformations and their inverses.

use sea_query::{
    Alias, ColumnDef, Expr, ForeignKey, ForeignKeyAction, Index, SimpleExpr, SqliteQueryBuilder,
    Table,
};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use crate::storage;

use super::backfill::Backfill;
use super::backup;
use super::enums::EnumCatalog;
use super::step::StepId;
use super::{MigrationError, Result};

/// Storage type of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    VarChar(u32),
    Boolean,
    Date,
    Timestamp,
    /// TEXT constrained to the labels of the named enum type.
    Enum(String),
}

/// Column default value.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    Bool(bool),
    Integer(i64),
    Text(String),
    CurrentTimestamp,
}

impl ColumnDefault {
    fn to_expr(&self) -> SimpleExpr {
        match self {
            ColumnDefault::Bool(v) => Expr::val(*v).into(),
            ColumnDefault::Integer(v) => Expr::val(*v).into(),
            ColumnDefault::Text(v) => Expr::val(v.as_str()).into(),
            ColumnDefault::CurrentTimestamp => Expr::current_timestamp().into(),
        }
    }
}

/// One column definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSpec {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub default: Option<ColumnDefault>,
}

impl ColumnSpec {
    /// Nullable column with no default.
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
            unique: false,
            primary_key: false,
            default: None,
        }
    }

    /// Auto-incrementing integer primary key.
    pub fn id(name: &str) -> Self {
        Self {
            nullable: false,
            primary_key: true,
            ..Self::new(name, ColumnType::Integer)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, value: ColumnDefault) -> Self {
        self.default = Some(value);
        self
    }

    /// Enum type name when this is an enum column.
    pub fn enum_name(&self) -> Option<&str> {
        match &self.ty {
            ColumnType::Enum(name) => Some(name),
            _ => None,
        }
    }

    async fn to_def(&self, conn: &mut SqliteConnection) -> Result<ColumnDef> {
        let mut def = ColumnDef::new(Alias::new(&self.name));
        match &self.ty {
            ColumnType::Integer => {
                def.integer();
            }
            ColumnType::Real => {
                def.double();
            }
            ColumnType::Text => {
                def.text();
            }
            ColumnType::VarChar(len) => {
                def.string_len(*len);
            }
            ColumnType::Boolean => {
                def.boolean();
            }
            ColumnType::Date => {
                def.date();
            }
            ColumnType::Timestamp => {
                def.timestamp();
            }
            ColumnType::Enum(name) => {
                let labels = EnumCatalog::labels(conn, name).await?;
                def.text()
                    .check(Expr::col(Alias::new(&self.name)).is_in(labels));
            }
        }

        if self.primary_key {
            def.not_null().auto_increment().primary_key();
        } else if !self.nullable {
            def.not_null();
        }
        if self.unique {
            def.unique_key();
        }
        if let Some(default) = &self.default {
            def.default(default.to_expr());
        }
        Ok(def)
    }
}

/// Action taken on the referencing row when the referenced row is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OnDelete {
    #[default]
    NoAction,
    Cascade,
    SetNull,
}

impl OnDelete {
    fn action(&self) -> ForeignKeyAction {
        match self {
            OnDelete::NoAction => ForeignKeyAction::NoAction,
            OnDelete::Cascade => ForeignKeyAction::Cascade,
            OnDelete::SetNull => ForeignKeyAction::SetNull,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKeySpec {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
    pub on_delete: OnDelete,
}

impl ForeignKeySpec {
    pub fn new(column: &str, references_table: &str, references_column: &str) -> Self {
        Self {
            column: column.to_string(),
            references_table: references_table.to_string(),
            references_column: references_column.to_string(),
            on_delete: OnDelete::NoAction,
        }
    }

    pub fn on_delete(mut self, action: OnDelete) -> Self {
        self.on_delete = action;
        self
    }
}

/// A whole table introduced by a step.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    pub fn foreign_key(mut self, fk: ForeignKeySpec) -> Self {
        self.foreign_keys.push(fk);
        self
    }

    async fn create(&self, conn: &mut SqliteConnection) -> Result<()> {
        let mut stmt = Table::create();
        stmt.table(Alias::new(&self.name));
        for column in &self.columns {
            stmt.col(&mut column.to_def(conn).await?);
        }
        for fk in &self.foreign_keys {
            stmt.foreign_key(
                ForeignKey::create()
                    .from(Alias::new(&self.name), Alias::new(&fk.column))
                    .to(
                        Alias::new(&fk.references_table),
                        Alias::new(&fk.references_column),
                    )
                    .on_delete(fk.on_delete.action()),
            );
        }
        sqlx::query(&stmt.to_string(SqliteQueryBuilder))
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}

/// A named enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSpec {
    pub name: String,
    pub labels: Vec<String>,
}

impl EnumSpec {
    pub fn new(name: &str, labels: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Columns a step adds to (or drops from) an existing table, with the key
/// used to merge a column backup back onto live rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnGroup {
    pub table: String,
    pub key: String,
    pub columns: Vec<ColumnSpec>,
}

impl ColumnGroup {
    pub fn new(table: &str, key: &str) -> Self {
        Self {
            table: table.to_string(),
            key: key.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, column: ColumnSpec) -> Self {
        self.columns.push(column);
        self
    }

    fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// SQLite cannot add a UNIQUE column, nor a NOT NULL column without a default.
    fn validate(&self) -> Result<()> {
        for column in &self.columns {
            if column.primary_key || column.unique {
                return Err(MigrationError::Definition(format!(
                    "{}.{}: added columns cannot be primary or unique keys; use an index",
                    self.table, column.name
                )));
            }
            if !column.nullable && column.default.is_none() {
                return Err(MigrationError::Definition(format!(
                    "{}.{}: NOT NULL column added without a default",
                    self.table, column.name
                )));
            }
            if column.default == Some(ColumnDefault::CurrentTimestamp) {
                return Err(MigrationError::Definition(format!(
                    "{}.{}: added columns cannot default to CURRENT_TIMESTAMP",
                    self.table, column.name
                )));
            }
        }
        Ok(())
    }

    async fn add(&self, conn: &mut SqliteConnection) -> Result<()> {
        self.validate()?;
        for column in &self.columns {
            let stmt = Table::alter()
                .table(Alias::new(&self.table))
                .add_column(&mut column.to_def(conn).await?)
                .to_string(SqliteQueryBuilder);
            sqlx::query(&stmt).execute(&mut *conn).await?;
            if let Some(enum_name) = column.enum_name() {
                EnumCatalog::register_usage(conn, &self.table, &column.name, enum_name).await?;
            }
        }
        Ok(())
    }

    async fn drop(&self, conn: &mut SqliteConnection) -> Result<()> {
        for column in self.columns.iter().rev() {
            let stmt = Table::alter()
                .table(Alias::new(&self.table))
                .drop_column(Alias::new(&column.name))
                .to_string(SqliteQueryBuilder);
            sqlx::query(&stmt).execute(&mut *conn).await?;
            if column.enum_name().is_some() {
                EnumCatalog::release_usage(conn, &self.table, Some(&column.name)).await?;
            }
        }
        Ok(())
    }

    /// Add the columns and merge any backup left by an earlier reversal.
    async fn add_and_restore(&self, conn: &mut SqliteConnection, step: &StepId) -> Result<()> {
        self.add(conn).await?;
        match backup::restore_columns(conn, step, self).await? {
            Some(report) => info!(
                step = %step,
                table = %self.table,
                backup = %report.backup,
                restored = report.restored,
                skipped = report.skipped,
                "Restored columns from backup"
            ),
            None => debug!(
                step = %step,
                table = %self.table,
                columns = ?self.column_names(),
                "No column backup; columns start at defaults"
            ),
        }
        Ok(())
    }

    /// Snapshot the columns into a backup, then drop them.
    async fn preserve_and_drop(&self, conn: &mut SqliteConnection, step: &StepId) -> Result<()> {
        let rows = backup::preserve_columns(conn, step, self).await?;
        info!(
            step = %step,
            table = %self.table,
            backup = %backup::backup_name(step, &self.table),
            rows,
            "Preserved columns"
        );
        self.drop(conn).await
    }
}

/// A named index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(name: &str, table: &str, columns: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            table: table.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

/// One schema or data transformation within a step.
#[derive(Debug, Clone)]
pub enum Transform {
    CreateEnum(EnumSpec),
    CreateTable(TableSpec),
    AddColumns(ColumnGroup),
    DropColumns(ColumnGroup),
    CreateIndex(IndexSpec),
    Backfill(Backfill),
}

impl Transform {
    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            Transform::CreateEnum(spec) => format!("create enum {}", spec.name),
            Transform::CreateTable(spec) => format!("create table {}", spec.name),
            Transform::AddColumns(group) => {
                format!("add {} to {}", group.column_names().join(", "), group.table)
            }
            Transform::DropColumns(group) => {
                format!("drop {} from {}", group.column_names().join(", "), group.table)
            }
            Transform::CreateIndex(spec) => format!("create index {}", spec.name),
            Transform::Backfill(backfill) => format!("backfill {}", backfill.name),
        }
    }

    pub(crate) async fn forward(&self, conn: &mut SqliteConnection, step: &StepId) -> Result<()> {
        match self {
            Transform::CreateEnum(spec) => {
                EnumCatalog::define(conn, spec).await?;
            }
            Transform::CreateTable(spec) => {
                if backup::restore_table(conn, step, &spec.name).await? {
                    info!(step = %step, table = %spec.name, "Restored table from backup");
                } else {
                    spec.create(conn).await?;
                    info!(step = %step, table = %spec.name, "Created table");
                }
                for column in &spec.columns {
                    if let Some(enum_name) = column.enum_name() {
                        EnumCatalog::register_usage(conn, &spec.name, &column.name, enum_name)
                            .await?;
                    }
                }
            }
            Transform::AddColumns(group) => group.add_and_restore(conn, step).await?,
            Transform::DropColumns(group) => group.preserve_and_drop(conn, step).await?,
            Transform::CreateIndex(spec) => create_index(conn, spec).await?,
            Transform::Backfill(backfill) => {
                backfill.run(conn).await?;
            }
        }
        Ok(())
    }

    pub(crate) async fn backward(&self, conn: &mut SqliteConnection, step: &StepId) -> Result<()> {
        match self {
            Transform::CreateEnum(spec) => {
                EnumCatalog::drop_if_unreferenced(conn, &spec.name).await?;
            }
            Transform::CreateTable(spec) => {
                let name = backup::preserve_table(conn, step, &spec.name).await?;
                EnumCatalog::release_usage(conn, &spec.name, None).await?;
                info!(step = %step, table = %spec.name, backup = %name, "Preserved table");
            }
            Transform::AddColumns(group) => group.preserve_and_drop(conn, step).await?,
            Transform::DropColumns(group) => group.add_and_restore(conn, step).await?,
            Transform::CreateIndex(spec) => {
                let sql = format!("DROP INDEX IF EXISTS {}", storage::ident(&spec.name));
                sqlx::query(&sql).execute(&mut *conn).await?;
            }
            Transform::Backfill(backfill) => {
                debug!(step = %step, backfill = %backfill.name, "Backfill has no inverse");
            }
        }
        Ok(())
    }
}

async fn create_index(conn: &mut SqliteConnection, spec: &IndexSpec) -> Result<()> {
    let mut stmt = Index::create();
    stmt.name(&spec.name)
        .table(Alias::new(&spec.table))
        .if_not_exists();
    for column in &spec.columns {
        stmt.col(Alias::new(column));
    }
    if spec.unique {
        stmt.unique();
    }
    sqlx::query(&stmt.to_string(SqliteQueryBuilder))
        .execute(&mut *conn)
        .await?;
    Ok(())
}
