use rocket_db_pools::sqlx::{self, PgPool};
use rocket_db_pools::Database;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("everato_db")]
pub struct EveratoDb(sqlx::PgPool);

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}
