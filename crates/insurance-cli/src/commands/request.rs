//! `insurance-cli request ...` — administrative actions for individual
//! rows. `abandon` and `unlock` expose the two operator interventions
//! spec.md names without an admin web UI to host them; `enqueue` is an
//! ops/test convenience for driving the engine without a caller
//! application.

use anyhow::{bail, Result};
use insurance_db::{HeaderKey, NewRequest};

use super::load_payload;

pub async fn enqueue(
    method: String,
    url: String,
    priority: i32,
    headers_json: Option<String>,
    payload: Option<String>,
    payload_file: Option<String>,
    retry_factor: i32,
    retry_inconsistent: bool,
) -> Result<()> {
    let pool = insurance_db::connect_from_env().await?;

    let secrets = insurance_config::resolve_secrets()?;
    let header_key = match (&headers_json, secrets.header_encryption_key_hex) {
        (Some(_), Some(hex_key)) => Some(HeaderKey::from_hex(&hex_key)?),
        (Some(_), None) => bail!("--headers-json was given but INSURANCE_HEADER_ENCRYPTION_KEY is unset"),
        (None, _) => None,
    };

    let payload = load_payload(payload, payload_file)?;

    let new_request = NewRequest {
        priority,
        method,
        url,
        headers_json,
        payload,
        retry_factor,
        retry_inconsistent,
    };

    let id = insurance_db::insert_request(&pool, &new_request, header_key.as_ref()).await?;
    println!("request_id={id}");
    Ok(())
}

pub async fn abandon(id: i64) -> Result<()> {
    let pool = insurance_db::connect_from_env().await?;
    let abandoned = insurance_db::abandon(&pool, id).await?;
    if !abandoned {
        bail!("request {id} was not abandoned: it no longer exists or is already terminal");
    }
    println!("request_id={id} state=abandoned");
    Ok(())
}

pub async fn unlock(id: i64) -> Result<()> {
    let pool = insurance_db::connect_from_env().await?;
    let unlocked = insurance_db::unlock(&pool, id).await?;
    if !unlocked {
        bail!("request {id} was not unlocked: it is not currently pending");
    }
    println!("request_id={id} state=ready");
    Ok(())
}
