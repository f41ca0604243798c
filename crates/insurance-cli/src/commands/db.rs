//! `insurance-cli db ...` — migration and operational status commands,
//! grounded on the teacher's `mqk db migrate` / `mqk db status`.

use anyhow::Result;

pub async fn status() -> Result<()> {
    let pool = insurance_db::connect_from_env().await?;
    let status = insurance_db::status(&pool).await?;
    println!("ready={}", status.ready);
    println!("pending={}", status.pending);
    println!("waiting={}", status.waiting);
    println!("completed={}", status.completed);
    println!("failed={}", status.failed);
    println!("abandoned={}", status.abandoned);
    Ok(())
}

pub async fn migrate() -> Result<()> {
    let pool = insurance_db::connect_from_env().await?;
    insurance_db::migrate(&pool).await?;
    println!("migrations_applied=true");
    Ok(())
}
