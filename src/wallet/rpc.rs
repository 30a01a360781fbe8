//! JSON-RPC balance oracle (`eth_getBalance`, ERC-20 `balanceOf`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::BalanceError;
use crate::service::Address;
use crate::wallet::BalanceOracle;

/// `balanceOf(address)` selector.
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

/// Base-unit decimals of native and staking tokens.
const TOKEN_DECIMALS: u32 = 18;

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct RpcBalanceOracle {
    rpc_url: Url,
    client: Client,
    next_id: AtomicU64,
}

impl RpcBalanceOracle {
    pub fn new(rpc_url: Url, timeout: Duration) -> Result<Self, BalanceError> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            BalanceError::Unreachable {
                url: rpc_url.to_string(),
                reason: format!("HTTP client init failed: {e}"),
            }
        })?;
        Ok(Self {
            rpc_url,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn rpc_url(&self) -> &Url {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: serde_json::Value) -> Result<String, BalanceError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        let unreachable = |reason: String| BalanceError::Unreachable {
            url: self.rpc_url.to_string(),
            reason,
        };

        let response = self
            .client
            .post(self.rpc_url.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(unreachable(format!("HTTP {}", status.as_u16())));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| BalanceError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(BalanceError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        body.result
            .ok_or_else(|| BalanceError::InvalidResponse(format!("{method} returned no result")))
    }
}

#[async_trait]
impl BalanceOracle for RpcBalanceOracle {
    async fn get_balance(&self, address: &Address) -> Result<Decimal, BalanceError> {
        let raw = self
            .call(
                "eth_getBalance",
                serde_json::json!([address.as_str(), "latest"]),
            )
            .await?;
        let balance = parse_base_units(&raw)?;
        tracing::debug!(address = %address, balance = %balance, "native balance");
        Ok(balance)
    }

    async fn get_token_balance(
        &self,
        address: &Address,
        token: &Address,
    ) -> Result<Decimal, BalanceError> {
        let data = format!("{BALANCE_OF_SELECTOR}{}", address.abi_word());
        let raw = self
            .call(
                "eth_call",
                serde_json::json!([{ "to": token.as_str(), "data": data }, "latest"]),
            )
            .await?;
        let balance = parse_base_units(&raw)?;
        tracing::debug!(address = %address, token = %token, balance = %balance, "token balance");
        Ok(balance)
    }
}

/// Parse a hex quantity of 18-decimal base units into whole token units.
fn parse_base_units(raw: &str) -> Result<Decimal, BalanceError> {
    let hex = raw
        .strip_prefix("0x")
        .ok_or_else(|| BalanceError::InvalidResponse(format!("expected hex quantity, got '{raw}'")))?;
    if hex.is_empty() {
        return Ok(Decimal::ZERO);
    }
    let units = u128::from_str_radix(hex, 16).map_err(|e| match e.kind() {
        std::num::IntErrorKind::PosOverflow => BalanceError::Overflow(raw.to_string()),
        _ => BalanceError::InvalidResponse(format!("invalid hex quantity '{raw}': {e}")),
    })?;
    let units = i128::try_from(units).map_err(|_| BalanceError::Overflow(raw.to_string()))?;
    Decimal::try_from_i128_with_scale(units, TOKEN_DECIMALS)
        .map(|d| d.normalize())
        .map_err(|_| BalanceError::Overflow(raw.to_string()))
}
