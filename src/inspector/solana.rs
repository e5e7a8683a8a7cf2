//! SPL Token / Token-2022 mint decoding over Solana JSON-RPC.

use crate::error::InspectError;
use crate::inspector::TokenInspector;
use crate::risk::extensions::{extensions_from_mint, ACCOUNT_TYPE_OFFSET, MINT_BASE_LEN};
use crate::types::{AccountModelToken, Address, TokenMetadata, TokenProgram};
use alloy_primitives::U256;
use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;
use tracing::{debug, instrument};

pub const SPL_TOKEN_PROGRAM_ID: &str = "TokenkegQfeZyiNwAJbNbGKPFXCWuBvf9Ss623VQ5DA";
pub const TOKEN_2022_PROGRAM_ID: &str = "TokenzQdBNbLqP5VEhdkAS6EPFLC1PHnBqCXEpPxuEb";

// Mint layout: COption<Pubkey> mint_authority, u64 supply, u8 decimals,
// bool is_initialized, COption<Pubkey> freeze_authority
const MINT_AUTHORITY_OFFSET: usize = 0;
const SUPPLY_OFFSET: usize = 36;
const DECIMALS_OFFSET: usize = 44;
const IS_INITIALIZED_OFFSET: usize = 45;
const FREEZE_AUTHORITY_OFFSET: usize = 46;

/// Reads mint accounts through a shared RPC client.
pub struct SolanaInspector {
    rpc: Arc<RpcClient>,
    retry_attempts: usize,
}

impl SolanaInspector {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc, retry_attempts: 3 }
    }

    async fn fetch_account(&self, pubkey: &Pubkey) -> Result<(Pubkey, Vec<u8>), InspectError> {
        let response = self
            .rpc
            .get_account_with_commitment(pubkey, self.rpc.commitment())
            .await
            .map_err(|e| InspectError::Rpc(e.to_string()))?;
        let account = response
            .value
            .ok_or_else(|| InspectError::AccountNotFound(pubkey.to_string()))?;
        Ok((account.owner, account.data))
    }
}

#[async_trait]
impl TokenInspector for SolanaInspector {
    #[instrument(skip(self))]
    async fn fetch_token_metadata(&self, address: &str) -> Result<TokenMetadata, InspectError> {
        let pubkey = Pubkey::from_str(address.trim())
            .map_err(|e| InspectError::InvalidAddress(format!("{}: {}", address, e)))?;

        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(self.retry_attempts);
        let (owner, data) = RetryIf::spawn(
            strategy,
            || self.fetch_account(&pubkey),
            |e: &InspectError| e.is_transient(),
        )
        .await?;

        let program = token_program(&owner).ok_or_else(|| InspectError::NotAMint {
            address: address.to_string(),
            reason: format!("owned by {}, not a token program", owner),
        })?;

        let token = decode_mint(&pubkey.to_string(), program, &data)?;
        debug!(
            "Decoded {:?} mint: supply {} decimals {} ({} extensions)",
            token.program,
            token.total_supply,
            token.decimals,
            token.extensions.len()
        );
        Ok(TokenMetadata::AccountModel(token))
    }
}

pub fn token_program(owner: &Pubkey) -> Option<TokenProgram> {
    match owner.to_string().as_str() {
        SPL_TOKEN_PROGRAM_ID => Some(TokenProgram::SplToken),
        TOKEN_2022_PROGRAM_ID => Some(TokenProgram::Token2022),
        _ => None,
    }
}

/// Decodes raw mint account bytes.
pub fn decode_mint(address: &str, program: TokenProgram, data: &[u8]) -> Result<AccountModelToken, InspectError> {
    let not_a_mint = |reason: &str| InspectError::NotAMint {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    if data.len() < MINT_BASE_LEN {
        return Err(not_a_mint("account data shorter than a mint"));
    }
    if data.len() > MINT_BASE_LEN {
        let extended_mint = program == TokenProgram::Token2022
            && data.len() > ACCOUNT_TYPE_OFFSET
            && data[ACCOUNT_TYPE_OFFSET] == 1;
        if !extended_mint {
            return Err(not_a_mint("account is a token account, not a mint"));
        }
    }
    if data[IS_INITIALIZED_OFFSET] != 1 {
        return Err(not_a_mint("mint is not initialized"));
    }

    let supply = u64::from_le_bytes(read_array(data, SUPPLY_OFFSET).ok_or_else(|| not_a_mint("truncated supply"))?);

    let extensions = match program {
        TokenProgram::Token2022 => extensions_from_mint(data),
        TokenProgram::SplToken => Vec::new(),
    };

    Ok(AccountModelToken {
        address: address.to_string(),
        program,
        total_supply: U256::from(supply),
        decimals: data[DECIMALS_OFFSET],
        mint_authority: read_coption_pubkey(data, MINT_AUTHORITY_OFFSET),
        freeze_authority: read_coption_pubkey(data, FREEZE_AUTHORITY_OFFSET),
        extensions,
    })
}

/// `COption<Pubkey>`: a u32 tag (1 = some) followed by 32 key bytes.
fn read_coption_pubkey(data: &[u8], offset: usize) -> Option<Address> {
    let tag = u32::from_le_bytes(read_array(data, offset)?);
    if tag != 1 {
        return None;
    }
    let key: [u8; 32] = read_array(data, offset + 4)?;
    Some(Pubkey::new_from_array(key).to_string())
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Option<[u8; N]> {
    data.get(offset..offset + N)?.try_into().ok()
}
