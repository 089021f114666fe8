//! Integration tests running generated SQL against SQLite.
//!
//! Each test executes planner or generator output on a real database and
//! inspects the result through SQLite's own catalog.

use std::collections::BTreeSet;

use forsuredb_core::prelude::*;
use forsuredb_migrate::prelude::*;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

type ColumnRow = (String, String, i64, Option<String>, i64);

async fn create_test_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(":memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

async fn execute_all(pool: &SqlitePool, statements: &[String]) {
    let mut conn = pool.acquire().await.unwrap();
    for sql in statements {
        sqlx::query(sql)
            .execute(&mut *conn)
            .await
            .unwrap_or_else(|e| panic!("Failed to execute: {sql}\nError: {e}"));
    }
}

async fn table_columns(pool: &SqlitePool, table: &str) -> Vec<ColumnRow> {
    sqlx::query_as(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY name"#,
    )
    .bind(table)
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn count(pool: &SqlitePool, sql: &str) -> i64 {
    let row: (i64,) = sqlx::query_as(sql).fetch_one(pool).await.unwrap();
    row.0
}

fn sample_table(name: &str, with_extra_columns: bool) -> TableInfo {
    let mut builder = TableInfo::builder(name);
    if with_extra_columns {
        builder = builder
            .column(ColumnInfo::new(name, "big_decimal_col", QualifiedType::BigDecimal))
            .column(ColumnInfo::new(name, "string_col", QualifiedType::String).default_value("Hel'lo!"))
            .column(
                ColumnInfo::new(name, "flag", QualifiedType::Boolean)
                    .not_null()
                    .default_value("false"),
            )
            .column(ColumnInfo::new(name, "ratio", QualifiedType::Double).default_value("1.5"));
    }
    builder.build().unwrap()
}

// =============================================================================
// Round trip through the catalog
// =============================================================================

#[tokio::test]
async fn test_create_table_round_trip() {
    let pool = create_test_pool().await;
    let table = sample_table("t1", true);
    let schema = Schema::new().table(table.clone());
    execute_all(
        &pool,
        &CreateTableGenerator::new("t1", &schema).unwrap().statements(),
    )
    .await;

    let dialect = SqliteDialect::new();
    let expected: Vec<ColumnRow> = table
        .columns
        .values()
        .map(|c| {
            let pk = i64::from(table.primary_key.contains(&c.name));
            (
                c.name.clone(),
                dialect.type_name(c.qualified_type).to_string(),
                i64::from(!c.nullable && pk == 0),
                dialect.render_default(c),
                pk,
            )
        })
        .collect();

    assert_eq!(table_columns(&pool, "t1").await, expected);
}

#[tokio::test]
async fn test_composite_primary_key_round_trip() {
    let pool = create_test_pool().await;
    let table = TableInfo::builder("t1")
        .column(ColumnInfo::new("t1", "a", QualifiedType::String))
        .column(ColumnInfo::new("t1", "b", QualifiedType::Int))
        .primary_key(["a", "b"], Some(ConflictResolution::Replace))
        .build()
        .unwrap();
    let schema = Schema::new().table(table.clone());
    execute_all(
        &pool,
        &CreateTableGenerator::new("t1", &schema).unwrap().statements(),
    )
    .await;

    let primary_key: BTreeSet<String> = table_columns(&pool, "t1")
        .await
        .into_iter()
        .filter(|row| row.4 > 0)
        .map(|row| row.0)
        .collect();
    assert_eq!(primary_key, table.primary_key);
}

// =============================================================================
// Additive equivalence
// =============================================================================

#[tokio::test]
async fn test_add_columns_matches_fresh_create() {
    let extended = sample_table("t1", true);
    let added: Vec<String> = extended
        .column_names()
        .filter(|c| !is_system(c))
        .map(ToString::to_string)
        .collect();

    let incremental = create_test_pool().await;
    let base = Schema::new().table(sample_table("t1", false));
    execute_all(
        &incremental,
        &CreateTableGenerator::new("t1", &base).unwrap().statements(),
    )
    .await;
    let target = Schema::new().table(extended);
    execute_all(
        &incremental,
        &AddColumnsGenerator::new("t1", &target, &added)
            .unwrap()
            .statements(),
    )
    .await;

    let fresh = create_test_pool().await;
    execute_all(
        &fresh,
        &CreateTableGenerator::new("t1", &target).unwrap().statements(),
    )
    .await;

    assert_eq!(
        table_columns(&incremental, "t1").await,
        table_columns(&fresh, "t1").await
    );
}

fn is_system(column: &str) -> bool {
    forsuredb_core::schema::is_system_column(column)
}

#[tokio::test]
async fn test_added_not_null_column_keeps_constraint() {
    let pool = create_test_pool().await;
    let sets = vec![
        MigrationSet::new(1).migration(Migration::create_table("t1")),
        MigrationSet::new(2).migration(Migration::add_column(
            "t1",
            "a",
            ColumnSpec::new(QualifiedType::Int).not_null(),
        )),
    ];
    MigrationExecutor::new(pool.clone())
        .migrate(&sets, None)
        .await
        .unwrap();

    let a = table_columns(&pool, "t1")
        .await
        .into_iter()
        .find(|row| row.0 == "a")
        .unwrap();
    assert_eq!(a.2, 1);

    let fresh = create_test_pool().await;
    let target = replay(&sets).unwrap();
    execute_all(
        &fresh,
        &CreateTableGenerator::new("t1", &target).unwrap().statements(),
    )
    .await;
    assert_eq!(
        table_columns(&pool, "t1").await,
        table_columns(&fresh, "t1").await
    );
}

// =============================================================================
// Planned versions against a live database
// =============================================================================

fn rename_manifest() -> Vec<MigrationSet> {
    vec![
        MigrationSet::new(1)
            .migration(Migration::create_table("t1"))
            .migration(Migration::add_column(
                "t1",
                "c1",
                ColumnSpec::new(QualifiedType::String),
            )),
        MigrationSet::new(2).migration(Migration::rename_column("t1", "c1", "c1_renamed")),
    ]
}

#[tokio::test]
async fn test_recreate_preserves_rows() {
    let pool = create_test_pool().await;
    let executor = MigrationExecutor::new(pool.clone());
    let sets = rename_manifest();

    executor.migrate(&sets, Some(1)).await.unwrap();
    sqlx::query("INSERT INTO t1 (c1) VALUES ('x'), ('y')")
        .execute(&pool)
        .await
        .unwrap();
    assert_eq!(count(&pool, "SELECT COUNT(*) FROM t1 WHERE c1 = 'x'").await, 1);

    assert_eq!(executor.migrate(&sets, None).await.unwrap(), vec![2]);

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM t1").await, 2);
    assert_eq!(
        count(&pool, "SELECT COUNT(*) FROM t1 WHERE c1_renamed = 'x'").await,
        1
    );
    assert_eq!(
        count(
            &pool,
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'forsuredb_new_t1'"
        )
        .await,
        0
    );
}

#[tokio::test]
async fn test_modified_trigger_survives_recreate() {
    let pool = create_test_pool().await;
    let executor = MigrationExecutor::new(pool.clone());
    executor.migrate(&rename_manifest(), None).await.unwrap();

    sqlx::query("INSERT INTO t1 (c1_renamed, modified) VALUES ('x', '2000-01-01 00:00:00.000')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("UPDATE t1 SET deleted = 1")
        .execute(&pool)
        .await
        .unwrap();

    let (modified,): (String,) = sqlx::query_as("SELECT modified FROM t1")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_ne!(modified, "2000-01-01 00:00:00.000");
}

#[tokio::test]
async fn test_composite_foreign_key_cascades() {
    let pool = create_test_pool().await;
    let sets = vec![MigrationSet::new(1)
        .migration(Migration::create_table("t1"))
        .migration(Migration::add_column("t1", "c1", ColumnSpec::new(QualifiedType::String)))
        .migration(Migration::add_column("t1", "c2", ColumnSpec::new(QualifiedType::String)))
        .migration(Migration::AddIndex {
            table: "t1".into(),
            columns: vec!["c1".into(), "c2".into()],
            order: SortOrder::Asc,
            unique: true,
        })
        .migration(Migration::create_table("t2"))
        .migration(Migration::AddForeignKeyReference {
            table: "t2".into(),
            column: "c1".into(),
            spec: ColumnSpec::new(QualifiedType::String),
            foreign_table: "t1".into(),
            foreign_column: "c1".into(),
            update_action: ForeignKeyAction::Cascade,
            delete_action: ForeignKeyAction::Cascade,
        })
        .migration(Migration::AddForeignKeyReference {
            table: "t2".into(),
            column: "c2".into(),
            spec: ColumnSpec::new(QualifiedType::String),
            foreign_table: "t1".into(),
            foreign_column: "c2".into(),
            update_action: ForeignKeyAction::Cascade,
            delete_action: ForeignKeyAction::Cascade,
        })];
    MigrationExecutor::new(pool.clone())
        .migrate(&sets, None)
        .await
        .unwrap();

    sqlx::query("INSERT INTO t1 (c1, c2) VALUES ('a', 'b')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO t2 (c1, c2) VALUES ('a', 'b')")
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query("DELETE FROM t1").execute(&pool).await.unwrap();

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM t2").await, 0);
}

#[tokio::test]
async fn test_migrate_file_database_twice() {
    let dir = tempfile::tempdir().unwrap();
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("app.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .unwrap();

    let executor = MigrationExecutor::new(pool.clone());
    assert_eq!(
        executor.migrate(&rename_manifest(), None).await.unwrap(),
        vec![1, 2]
    );
    assert!(executor
        .migrate(&rename_manifest(), None)
        .await
        .unwrap()
        .is_empty());

    let applied = executor.history().get_applied().await.unwrap();
    assert_eq!(applied.len(), 2);
    assert_eq!(
        table_columns(&pool, "t1")
            .await
            .into_iter()
            .map(|row| row.0)
            .collect::<Vec<_>>(),
        vec!["_id", "c1_renamed", "created", "deleted", "modified"]
    );
}
