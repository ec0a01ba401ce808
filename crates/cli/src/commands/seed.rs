use callquote_db::{DbPool, DemoSeed};

use crate::commands::{finish, open_store, prepare, CommandResult, Failure};

const COMMAND: &str = "seed";

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare(COMMAND) {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = open_store(&config).await?;
        let outcome = seed_demo_tenant(&pool).await;
        pool.close().await;
        outcome
    });

    finish(COMMAND, result)
}

async fn seed_demo_tenant(pool: &DbPool) -> Result<String, Failure> {
    let seeded =
        DemoSeed::load(pool).await.map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
    let verified =
        DemoSeed::verify(pool).await.map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
    if !verified {
        return Err((
            "seed_verification",
            "stored demo tenant does not match the fixture".to_string(),
            6u8,
        ));
    }
    Ok(seed_message(&seeded.tenants_seeded))
}

fn seed_message(tenants: &[String]) -> String {
    format!("demo tenant profile(s) upserted: {}", tenants.join(", "))
}
