use crate::error::{DatabaseError, DatabaseErrorExt};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tracing::trace;

/// One versioned bootstrap script. Scripts are idempotent (`IF NOT EXISTS`),
/// but applied versions are recorded so already-run scripts are skipped.
#[derive(Debug)]
struct Migration {
    version: &'static str,
    script: &'static str,
}

const MIGRATION_TABLE: &str = "
    DEFINE TABLE IF NOT EXISTS migration SCHEMAFULL;
    DEFINE FIELD IF NOT EXISTS version ON migration TYPE string;
    DEFINE FIELD IF NOT EXISTS applied_at ON migration TYPE datetime DEFAULT time::now();
    DEFINE INDEX IF NOT EXISTS migration_version ON migration FIELDS version UNIQUE;
";

/// The delivery platform's record tables as the tracking slice needs them.
/// Parcels and users are keyed by external string ids so the surrounding
/// CRUD services stay the source of truth for id allocation.
const MIGRATIONS: &[Migration] = &[Migration {
    version: "0001_delivery_records",
    script: "
        DEFINE TABLE IF NOT EXISTS client SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS user_id ON client TYPE string;
        DEFINE FIELD IF NOT EXISTS full_name ON client TYPE string;
        DEFINE FIELD IF NOT EXISTS email ON client TYPE string;
        DEFINE INDEX IF NOT EXISTS client_user_id ON client FIELDS user_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS parcel SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS parcel_id ON parcel TYPE string;
        DEFINE FIELD IF NOT EXISTS tracking_number ON parcel TYPE string;
        DEFINE FIELD IF NOT EXISTS client ON parcel TYPE string;
        DEFINE FIELD IF NOT EXISTS current_status ON parcel TYPE string;
        DEFINE INDEX IF NOT EXISTS parcel_parcel_id ON parcel FIELDS parcel_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS parcel_client ON parcel FIELDS client;

        DEFINE TABLE IF NOT EXISTS assignment SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS driver ON assignment TYPE string;
        DEFINE FIELD IF NOT EXISTS parcel ON assignment TYPE string;
        DEFINE FIELD IF NOT EXISTS assigned_at ON assignment TYPE datetime DEFAULT time::now();
        DEFINE INDEX IF NOT EXISTS assignment_driver ON assignment FIELDS driver;
        DEFINE INDEX IF NOT EXISTS assignment_parcel ON assignment FIELDS parcel UNIQUE;

        DEFINE TABLE IF NOT EXISTS location SCHEMAFULL;
        DEFINE FIELD IF NOT EXISTS driver ON location TYPE string;
        DEFINE FIELD IF NOT EXISTS parcel ON location TYPE option<string>;
        DEFINE FIELD IF NOT EXISTS latitude ON location TYPE float;
        DEFINE FIELD IF NOT EXISTS longitude ON location TYPE float;
        DEFINE FIELD IF NOT EXISTS address ON location TYPE string;
        DEFINE FIELD IF NOT EXISTS recorded_at ON location TYPE datetime DEFAULT time::now();
        DEFINE INDEX IF NOT EXISTS location_driver ON location FIELDS driver, recorded_at;
    ",
}];

#[derive(Debug, Default)]
pub(crate) struct MigrationReport {
    pub applied: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

#[derive(Debug)]
pub(crate) struct MigrationRunner {
    db: Surreal<Any>,
}

impl MigrationRunner {
    #[must_use]
    pub(crate) const fn new(db: Surreal<Any>) -> Self {
        Self { db }
    }

    pub(crate) async fn run(&self) -> Result<MigrationReport, DatabaseError> {
        self.db
            .query(MIGRATION_TABLE)
            .await
            .context("Defining migration table")?
            .check()
            .map_err(surrealdb::Error::from)
            .context("Defining migration table")?;

        let applied_versions = self.applied_versions().await?;

        let mut report = MigrationReport::default();
        for migration in MIGRATIONS {
            if applied_versions.iter().any(|v| v == migration.version) {
                trace!(version = migration.version, "Skipping migration");
                report.skipped.push(migration.version);
                continue;
            }

            self.apply(migration).await?;
            report.applied.push(migration.version);
        }

        Ok(report)
    }

    async fn apply(&self, migration: &Migration) -> Result<(), DatabaseError> {
        let query = format!(
            "BEGIN TRANSACTION;
            {}
            CREATE migration CONTENT {{ version: $version }};
            COMMIT TRANSACTION;",
            migration.script,
        );

        self.db
            .query(&query)
            .bind(("version", migration.version))
            .await
            .context(format!("SQL execution failed at {}", migration.version))?
            .check()
            .map_err(surrealdb::Error::from)
            .map_err(|e| DatabaseError::Migration {
                message: e.to_string().into(),
                context: Some(migration.version.into()),
            })?;

        Ok(())
    }

    async fn applied_versions(&self) -> Result<Vec<String>, DatabaseError> {
        let versions = self
            .db
            .query("SELECT VALUE version FROM migration")
            .await
            .context("Loading applied migrations")?
            .take::<Vec<String>>(0)
            .context("Parsing applied migrations")?;

        Ok(versions)
    }
}
