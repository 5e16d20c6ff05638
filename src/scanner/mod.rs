//! Wallet scanning for whitelisted inbound transfers
//!
//! One-shot by design: a scan runs at startup and immediately after each
//! executed trade, never on a timer. This is a deliberate anti-polling
//! rule, not an optimization.


use crate::chain::ChainContext;
use crate::config::ScannerConfig;
use crate::error::{Result, TraderError};
use crate::storage::Database;
use crate::types::{address_key, TokenMeta};
use ethers::types::{Address, U256};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashSet;

/// The two legal reasons to rescan the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTrigger {
    Startup,
    PostTrade,
}

impl ScanTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanTrigger::Startup => "startup",
            ScanTrigger::PostTrade => "post_trade",
        }
    }
}

/// An inbound ERC-20 transfer as reported by the transfer source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTransfer {
    pub sender: Address,
    pub token: Address,
    pub symbol: Option<String>,
}

/// A token balance eligible to become a new position.
#[derive(Debug, Clone)]
pub struct NewHolding {
    pub token: Address,
    pub symbol: String,
    pub decimals: u8,
    pub quantity: Decimal,
    pub quantity_raw: U256,
    pub sender: Address,
}

/// Keep only transfers from whitelisted senders of non-quote tokens,
/// deduplicated by token (first hit wins; transfers arrive newest first).
pub fn select_candidates(
    transfers: &[InboundTransfer],
    whitelist: &HashSet<Address>,
    skip_tokens: &HashSet<Address>,
) -> Vec<InboundTransfer> {
    let mut seen = HashSet::new();
    transfers
        .iter()
        .filter(|t| whitelist.contains(&t.sender))
        .filter(|t| !skip_tokens.contains(&t.token))
        .filter(|t| seen.insert(t.token))
        .cloned()
        .collect()
}

/// Parse an `alchemy_getAssetTransfers` response body.
pub fn parse_alchemy_transfers(result: &Value) -> Vec<InboundTransfer> {
    let transfers = result
        .get("transfers")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    transfers
        .iter()
        .filter_map(|t| {
            let sender: Address = t.get("from")?.as_str()?.parse().ok()?;
            let token: Address = t
                .get("rawContract")?
                .get("address")?
                .as_str()?
                .parse()
                .ok()?;
            let symbol = t
                .get("asset")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(InboundTransfer {
                sender,
                token,
                symbol,
            })
        })
        .collect()
}

/// Parse an Etherscan-style `account/tokentx` response body, keeping only
/// transfers into `wallet`.
pub fn parse_etherscan_transfers(body: &Value, wallet: Address) -> Vec<InboundTransfer> {
    if body.get("status").and_then(Value::as_str) != Some("1") {
        return Vec::new();
    }
    let rows = body
        .get("result")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    rows.iter()
        .filter_map(|t| {
            let to: Address = t.get("to")?.as_str()?.parse().ok()?;
            if to != wallet {
                return None;
            }
            let sender: Address = t.get("from")?.as_str()?.parse().ok()?;
            let token: Address = t.get("contractAddress")?.as_str()?.parse().ok()?;
            let symbol = t
                .get("tokenSymbol")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(InboundTransfer {
                sender,
                token,
                symbol,
            })
        })
        .collect()
}

pub struct WalletScanner {
    db: Database,
    cfg: ScannerConfig,
    http: reqwest::Client,
}

impl WalletScanner {
    pub fn new(db: Database, cfg: ScannerConfig) -> Self {
        Self {
            db,
            cfg,
            http: reqwest::Client::new(),
        }
    }

    /// Scan one chain for new holdings from whitelisted senders. Errors
    /// here skip the chain for this pass; they never tear down the loop.
    pub async fn scan_chain(
        &self,
        ctx: &ChainContext,
        trigger: ScanTrigger,
    ) -> Result<Vec<NewHolding>> {
        let whitelist: HashSet<Address> =
            self.db.whitelisted_senders().await?.into_iter().collect();
        if whitelist.is_empty() {
            tracing::debug!(chain = ctx.name(), "no whitelisted senders, skipping scan");
            return Ok(Vec::new());
        }

        let transfers = self.fetch_transfers(ctx).await?;
        let skip: HashSet<Address> = ctx.quote_assets().into_iter().collect();
        let candidates = select_candidates(&transfers, &whitelist, &skip);

        tracing::info!(
            chain = ctx.name(),
            trigger = trigger.as_str(),
            transfers = transfers.len(),
            candidates = candidates.len(),
            "wallet scan"
        );

        let mut holdings = Vec::new();
        for candidate in candidates {
            if self
                .db
                .open_position_for(ctx.chain_id(), candidate.token)
                .await?
                .is_some()
            {
                continue;
            }

            // Confirm the balance is still held and above dust.
            let (quantity, quantity_raw, decimals) =
                match ctx.token_balance(candidate.token).await {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(
                            token = %address_key(candidate.token),
                            error = %e,
                            "balance read failed, skipping token"
                        );
                        continue;
                    }
                };
            if quantity <= self.cfg.dust_threshold {
                continue;
            }

            let symbol = match candidate.symbol.clone() {
                Some(s) if !s.is_empty() => s,
                _ => ctx
                    .token_symbol(candidate.token)
                    .await
                    .unwrap_or_else(|_| "???".to_string()),
            };

            self.db
                .upsert_token(&TokenMeta {
                    address: candidate.token,
                    chain_id: ctx.chain_id(),
                    symbol: symbol.clone(),
                    name: None,
                    decimals,
                })
                .await?;

            tracing::info!(
                chain = ctx.name(),
                token = %address_key(candidate.token),
                symbol = %symbol,
                quantity = %quantity,
                sender = %address_key(candidate.sender),
                "holding from whitelisted sender"
            );

            holdings.push(NewHolding {
                token: candidate.token,
                symbol,
                decimals,
                quantity,
                quantity_raw,
                sender: candidate.sender,
            });
        }

        Ok(holdings)
    }

    /// Alchemy-style transfer history, falling back to the chain's
    /// explorer API when the RPC method is unavailable.
    async fn fetch_transfers(&self, ctx: &ChainContext) -> Result<Vec<InboundTransfer>> {
        match self.fetch_alchemy(ctx).await {
            Ok(transfers) => Ok(transfers),
            Err(rpc_err) => match self.fetch_etherscan(ctx).await {
                Ok(Some(transfers)) => Ok(transfers),
                Ok(None) => Err(rpc_err),
                Err(fallback_err) => {
                    tracing::debug!(error = %fallback_err, "explorer fallback also failed");
                    Err(rpc_err)
                }
            },
        }
    }

    async fn fetch_alchemy(&self, ctx: &ChainContext) -> Result<Vec<InboundTransfer>> {
        let params = json!({
            "toAddress": address_key(ctx.wallet_address()),
            "category": ["erc20"],
            "order": "desc",
            "maxCount": format!("0x{:x}", self.cfg.max_transfers),
            "withMetadata": true,
        });
        let result: Value = ctx
            .provider
            .request("alchemy_getAssetTransfers", [params])
            .await
            .map_err(|e| TraderError::Scan(format!("getAssetTransfers: {e}")))?;
        Ok(parse_alchemy_transfers(&result))
    }

    /// Returns `Ok(None)` when the fallback is not configured for this
    /// chain.
    async fn fetch_etherscan(&self, ctx: &ChainContext) -> Result<Option<Vec<InboundTransfer>>> {
        let (base, key) = match (&ctx.cfg.explorer_api_url, &self.cfg.etherscan_api_key) {
            (Some(base), Some(key)) => (base.clone(), key.clone()),
            _ => return Ok(None),
        };

        let wallet = ctx.wallet_address();
        let params = [
            ("module", "account".to_string()),
            ("action", "tokentx".to_string()),
            ("address", address_key(wallet)),
            ("sort", "desc".to_string()),
            ("page", "1".to_string()),
            ("offset", self.cfg.max_transfers.to_string()),
            ("apikey", key),
        ];
        let body: Value = self
            .http
            .get(&base)
            .query(&params)
            .send()
            .await
            .map_err(|e| TraderError::Scan(format!("explorer request: {e}")))?
            .json()
            .await
            .map_err(|e| TraderError::Scan(format!("explorer response: {e}")))?;

        Ok(Some(parse_etherscan_transfers(&body, wallet)))
    }
}
