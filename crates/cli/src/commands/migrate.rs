use crate::commands::{finish, open_store, prepare, CommandResult, Failure};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare(COMMAND) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let applied: Result<i64, _> =
            sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success = 1")
                .fetch_one(&pool)
                .await;
        pool.close().await;
        let applied = applied.map_err(|error| ("migration", error.to_string(), 5u8))?;
        Ok::<_, Failure>(format!("conversation store is at {applied} applied migration(s)"))
    });

    finish(COMMAND, result)
}
