//! A small interpreter for the DDL subset used by migration scripts.
//!
//! Scripts are parsed with the PostgreSQL dialect of `sqlparser`. Only the
//! shape of the schema is tracked: which tables, indexes and views exist,
//! and which relations each view reads from. Column definitions and index
//! expressions are accepted and ignored.

use sqlparser::ast::{ObjectName, ObjectType, Query, Statement, visit_relations};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use strata_core::StoreError;

/// The kind of a schema object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectKind {
    /// A table.
    Table,
    /// An index on the named table.
    Index {
        /// The indexed table.
        table: String,
    },
    /// A view.
    View,
}

impl ObjectKind {
    fn describe(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::Index { .. } => "index",
            ObjectKind::View => "view",
        }
    }
}

/// The set of objects in a store, keyed by lowercase name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Schema {
    objects: BTreeMap<String, ObjectKind>,
    /// Relations read by each view.
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl Schema {
    pub(crate) fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(&normalize(name))
    }

    pub(crate) fn kind(&self, name: &str) -> Option<&ObjectKind> {
        self.objects.get(&normalize(name))
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.objects.keys().cloned().collect()
    }

    pub(crate) fn create_table(&mut self, name: &str) {
        self.objects.insert(normalize(name), ObjectKind::Table);
    }

    /// Applies every statement of `script`, stopping at the first rejected one.
    ///
    /// A script that does not parse is rejected before anything is applied.
    /// Statements before a rejected one stay applied; callers work on a copy
    /// and discard it on error.
    pub(crate) fn apply_script(&mut self, script: &str) -> Result<(), StoreError> {
        let statements = Parser::parse_sql(&PostgreSqlDialect {}, script)
            .map_err(|err| StoreError::Rejected(Box::new(err)))?;
        for statement in &statements {
            self.apply_statement(statement)?;
        }
        Ok(())
    }

    fn apply_statement(&mut self, statement: &Statement) -> Result<(), StoreError> {
        match statement {
            Statement::CreateTable(create) => {
                self.create(object_name(&create.name), ObjectKind::Table, create.if_not_exists)
            }
            Statement::CreateIndex(create) => {
                let Some(name) = &create.name else {
                    return Err(StoreError::rejected(format!(
                        "unnamed index on {} is not supported",
                        create.table_name
                    )));
                };
                let table = object_name(&create.table_name);
                if self.objects.get(&table) != Some(&ObjectKind::Table) {
                    return Err(missing_relation(&table));
                }
                self.create(object_name(name), ObjectKind::Index { table }, create.if_not_exists)
            }
            Statement::CreateView {
                or_replace,
                name,
                query,
                if_not_exists,
                ..
            } => self.create_view(object_name(name), query, *or_replace, *if_not_exists),
            Statement::Drop {
                object_type,
                if_exists,
                names,
                cascade,
                ..
            } => {
                for name in names {
                    self.drop_object(object_type, &object_name(name), *if_exists, *cascade)?;
                }
                Ok(())
            }
            Statement::AlterTable { name, if_exists, .. } => {
                let name = object_name(name);
                if self.objects.get(&name) != Some(&ObjectKind::Table) && !*if_exists {
                    return Err(missing_relation(&name));
                }
                Ok(())
            }
            other => Err(StoreError::rejected(format!("unsupported statement `{}`", other))),
        }
    }

    fn create(
        &mut self,
        name: String,
        kind: ObjectKind,
        if_not_exists: bool,
    ) -> Result<(), StoreError> {
        if self.objects.contains_key(&name) {
            if if_not_exists {
                return Ok(());
            }
            return Err(StoreError::rejected(format!("relation \"{}\" already exists", name)));
        }
        self.objects.insert(name, kind);
        Ok(())
    }

    fn create_view(
        &mut self,
        name: String,
        query: &Query,
        or_replace: bool,
        if_not_exists: bool,
    ) -> Result<(), StoreError> {
        let reads = self.relations_read_by(query)?;
        match self.objects.get(&name).cloned() {
            Some(ObjectKind::View) if or_replace => {}
            Some(_) if if_not_exists => return Ok(()),
            Some(_) => {
                return Err(StoreError::rejected(format!("relation \"{}\" already exists", name)));
            }
            None => {
                self.objects.insert(name.clone(), ObjectKind::View);
            }
        }
        self.dependencies.insert(name, reads);
        Ok(())
    }

    /// Names of the existing relations `query` selects from.
    ///
    /// Relations named by a `WITH` clause of the query itself are skipped.
    fn relations_read_by(&self, query: &Query) -> Result<BTreeSet<String>, StoreError> {
        let ctes: BTreeSet<String> = query
            .with
            .iter()
            .flat_map(|with| with.cte_tables.iter())
            .map(|cte| cte.alias.name.value.to_lowercase())
            .collect();

        let mut reads = BTreeSet::new();
        let flow = visit_relations(query, |relation: &ObjectName| {
            let name = object_name(relation);
            if ctes.contains(&name) {
                return ControlFlow::Continue(());
            }
            match self.objects.get(&name) {
                Some(ObjectKind::Table) | Some(ObjectKind::View) => {
                    reads.insert(name);
                    ControlFlow::Continue(())
                }
                _ => ControlFlow::Break(name),
            }
        });
        match flow {
            ControlFlow::Break(missing) => Err(missing_relation(&missing)),
            ControlFlow::Continue(()) => Ok(reads),
        }
    }

    fn drop_object(
        &mut self,
        object_type: &ObjectType,
        name: &str,
        if_exists: bool,
        cascade: bool,
    ) -> Result<(), StoreError> {
        let expected = match object_type {
            ObjectType::Table => "table",
            ObjectType::Index => "index",
            ObjectType::View => "view",
            other => {
                return Err(StoreError::rejected(format!("unsupported statement `DROP {}`", other)));
            }
        };
        match self.objects.get(name) {
            Some(kind) if kind.describe() == expected => {}
            Some(_) => {
                return Err(StoreError::rejected(format!("\"{}\" is not a {}", name, expected)));
            }
            None if if_exists => return Ok(()),
            None => {
                return Err(StoreError::rejected(format!(
                    "{} \"{}\" does not exist",
                    expected, name
                )));
            }
        }
        self.remove(name, cascade)
    }

    /// Removes `name` with its indexes. Views reading from it are removed
    /// too when `cascade` is set, otherwise the drop is refused.
    fn remove(&mut self, name: &str, cascade: bool) -> Result<(), StoreError> {
        let dependents: Vec<String> = self
            .dependencies
            .iter()
            .filter(|(_, reads)| reads.contains(name))
            .map(|(view, _)| view.clone())
            .collect();
        if !dependents.is_empty() && !cascade {
            return Err(StoreError::rejected(format!(
                "cannot drop \"{}\" because other objects depend on it: {}",
                name,
                dependents.join(", ")
            )));
        }
        for view in dependents {
            self.remove(&view, true)?;
        }

        self.objects.remove(name);
        self.dependencies.remove(name);
        self.objects.retain(|_, object| {
            !matches!(object, ObjectKind::Index { table } if table.as_str() == name)
        });
        Ok(())
    }
}

fn object_name(name: &ObjectName) -> String {
    name.0
        .last()
        .map(|ident| ident.value.to_lowercase())
        .unwrap_or_default()
}

fn normalize(name: &str) -> String {
    let unquoted = name.trim_matches('"');
    let unqualified = unquoted.rsplit('.').next().unwrap_or(unquoted);
    unqualified.trim_matches('"').to_lowercase()
}

fn missing_relation(name: &str) -> StoreError {
    StoreError::rejected(format!("relation \"{}\" does not exist", name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(script: &str) -> Schema {
        let mut schema = Schema::default();
        schema.apply_script(script).expect("script should apply");
        schema
    }

    #[test]
    fn creates_tables_indexes_and_views() {
        let schema = schema(
            "CREATE TABLE IF NOT EXISTS uploads (
                id VARCHAR PRIMARY KEY,
                filename VARCHAR NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_uploads_filename ON uploads(filename);
            CREATE OR REPLACE VIEW upload_names AS SELECT filename FROM uploads;",
        );
        assert_eq!(schema.kind("uploads"), Some(&ObjectKind::Table));
        assert_eq!(
            schema.kind("idx_uploads_filename"),
            Some(&ObjectKind::Index {
                table: "uploads".to_string()
            })
        );
        assert_eq!(schema.kind("UPLOAD_NAMES"), Some(&ObjectKind::View));
    }

    #[test]
    fn comments_and_blank_statements_are_ignored() {
        let schema = schema("-- create the table\nCREATE TABLE a (id INT); ;\n-- done\n");
        assert_eq!(schema.names(), vec!["a".to_string()]);
    }

    #[test]
    fn string_literals_do_not_end_statements() {
        let schema = schema("CREATE TABLE a (s VARCHAR DEFAULT '--'); CREATE TABLE b (id INT)");
        assert_eq!(schema.names(), vec!["a".to_string(), "b".to_string()]);

        let schema = self::schema(
            "CREATE TABLE a (s VARCHAR CHECK (s IN ('x;y'))); CREATE INDEX idx_a ON a(s)",
        );
        assert_eq!(
            schema.kind("idx_a"),
            Some(&ObjectKind::Index {
                table: "a".to_string()
            })
        );
    }

    #[test]
    fn unparsable_script_applies_nothing() {
        let mut schema = Schema::default();
        let err = schema
            .apply_script("CREATE TABLE a (id INT); CREATE TABLE (")
            .unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(schema.names().is_empty());
    }

    #[test]
    fn create_without_guard_fails_on_existing_object() {
        let mut schema = schema("CREATE TABLE a (id INT)");
        let err = schema.apply_script("CREATE TABLE a (id INT)").unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert!(schema.apply_script("CREATE TABLE IF NOT EXISTS a (id INT)").is_ok());
    }

    #[test]
    fn drop_without_guard_fails_on_missing_object() {
        let mut schema = Schema::default();
        assert!(schema.apply_script("DROP TABLE a").is_err());
        assert!(schema.apply_script("DROP TABLE IF EXISTS a").is_ok());
        assert!(schema.apply_script("DROP INDEX IF EXISTS idx_a").is_ok());
    }

    #[test]
    fn dropping_a_table_drops_its_indexes() {
        let mut schema = schema(
            "CREATE TABLE a (id INT); CREATE UNIQUE INDEX idx_a ON a (id); CREATE TABLE b (id INT)",
        );
        schema.apply_script("DROP TABLE a").unwrap();
        assert_eq!(schema.names(), vec!["b".to_string()]);
    }

    #[test]
    fn index_requires_existing_table() {
        let mut schema = Schema::default();
        let err = schema
            .apply_script("CREATE INDEX idx_a ON a(id)")
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn or_replace_view_is_idempotent() {
        let mut schema =
            schema("CREATE TABLE a (id INT); CREATE OR REPLACE VIEW v AS SELECT id FROM a");
        assert!(
            schema
                .apply_script("CREATE OR REPLACE VIEW v AS SELECT id FROM a")
                .is_ok()
        );
        assert!(schema.apply_script("CREATE VIEW v AS SELECT 1").is_err());
    }

    #[test]
    fn view_on_missing_relation_is_rejected() {
        let mut schema = Schema::default();
        let err = schema
            .apply_script("CREATE VIEW v AS SELECT id FROM a")
            .unwrap_err();
        assert!(err.to_string().contains("\"a\" does not exist"));
        assert!(!schema.contains("v"));
    }

    #[test]
    fn view_may_read_from_its_own_cte() {
        let schema = schema(
            "CREATE TABLE a (id INT);
             CREATE VIEW v AS WITH recent AS (SELECT id FROM a) SELECT id FROM recent",
        );
        assert_eq!(schema.kind("v"), Some(&ObjectKind::View));
    }

    #[test]
    fn table_read_by_a_view_cannot_be_dropped() {
        let mut schema = schema("CREATE TABLE a (id INT); CREATE VIEW v AS SELECT id FROM a");

        let err = schema.apply_script("DROP TABLE a").unwrap_err();

        assert!(err.to_string().contains("other objects depend on it"));
        assert_eq!(schema.names(), vec!["a".to_string(), "v".to_string()]);
        schema.apply_script("DROP VIEW v; DROP TABLE a").unwrap();
        assert!(schema.names().is_empty());
    }

    #[test]
    fn cascade_drops_dependent_views() {
        let mut schema = schema(
            "CREATE TABLE a (id INT);
             CREATE VIEW v AS SELECT id FROM a;
             CREATE VIEW w AS SELECT id FROM v;
             CREATE TABLE b (id INT)",
        );
        schema.apply_script("DROP TABLE a CASCADE").unwrap();
        assert_eq!(schema.names(), vec!["b".to_string()]);
    }

    #[test]
    fn replacing_a_view_updates_what_it_reads() {
        let mut schema = schema(
            "CREATE TABLE a (id INT);
             CREATE TABLE b (id INT);
             CREATE VIEW v AS SELECT id FROM a",
        );
        schema
            .apply_script("CREATE OR REPLACE VIEW v AS SELECT id FROM b")
            .unwrap();
        assert!(schema.apply_script("DROP TABLE a").is_ok());
        assert!(schema.apply_script("DROP TABLE b").is_err());
    }

    #[test]
    fn unsupported_statements_are_rejected() {
        let mut schema = Schema::default();
        let err = schema.apply_script("THIS IS NOT SQL").unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));

        let err = schema.apply_script("SELECT 1").unwrap_err();
        assert!(err.to_string().contains("unsupported statement"));
    }

    #[test]
    fn qualified_and_quoted_names_are_normalized() {
        let schema = schema("CREATE TABLE public.\"Uploads\" (id INT)");
        assert!(schema.contains("uploads"));
    }

    #[test]
    fn wrong_kind_drop_is_rejected() {
        let mut schema = schema("CREATE TABLE a (id INT)");
        assert!(schema.apply_script("DROP VIEW a").is_err());
        assert!(schema.contains("a"));
    }
}
