//! Token-2022 extension list decoding.
//!
//! A Token-2022 mint is the 82-byte SPL mint, zero-padded to the 165-byte
//! account length, followed by a one-byte account type and a list of
//! `(type: u16 LE, length: u16 LE, value)` entries.

use crate::types::{Address, TokenExtension};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

/// Length of the base SPL mint layout.
pub const MINT_BASE_LEN: usize = 82;

/// Offset of the account-type byte in extended accounts.
pub const ACCOUNT_TYPE_OFFSET: usize = 165;

const ACCOUNT_TYPE_MINT: u8 = 1;
const TLV_HEADER_LEN: usize = 4;

pub const EXTENSION_UNINITIALIZED: u16 = 0;
pub const EXTENSION_TRANSFER_FEE_CONFIG: u16 = 1;
pub const EXTENSION_NON_TRANSFERABLE: u16 = 9;
pub const EXTENSION_PERMANENT_DELEGATE: u16 = 12;
pub const EXTENSION_TRANSFER_HOOK: u16 = 14;

// TransferFeeConfig: two authorities, withheld amount, then older/newer
// TransferFee { epoch: u64, maximum_fee: u64, transfer_fee_basis_points: u16 }
const TRANSFER_FEE_CONFIG_LEN: usize = 108;
const OLDER_FEE_OFFSET: usize = 72;
const NEWER_FEE_OFFSET: usize = 90;

/// The TLV region of a mint account, if the account carries extensions.
pub fn tlv_region(mint_data: &[u8]) -> Option<&[u8]> {
    if mint_data.len() <= ACCOUNT_TYPE_OFFSET {
        return None;
    }
    if mint_data[ACCOUNT_TYPE_OFFSET] != ACCOUNT_TYPE_MINT {
        debug!(
            "Account type byte {} is not a mint, ignoring extensions",
            mint_data[ACCOUNT_TYPE_OFFSET]
        );
        return None;
    }
    Some(&mint_data[ACCOUNT_TYPE_OFFSET + 1..])
}

/// Parses a TLV extension list.
///
/// Parsing stops at the first uninitialized entry or at an entry whose
/// declared length runs past the end of the buffer; extensions decoded
/// before that point are returned.
pub fn parse_extensions(tlv: &[u8]) -> Vec<TokenExtension> {
    let mut extensions = Vec::new();
    let mut offset = 0usize;

    while offset + TLV_HEADER_LEN <= tlv.len() {
        let extension_type = u16::from_le_bytes([tlv[offset], tlv[offset + 1]]);
        let length = u16::from_le_bytes([tlv[offset + 2], tlv[offset + 3]]) as usize;

        if extension_type == EXTENSION_UNINITIALIZED {
            break;
        }

        let start = offset + TLV_HEADER_LEN;
        let end = start + length;
        if end > tlv.len() {
            debug!(
                "Extension {} declares {} bytes but only {} remain, stopping",
                extension_type,
                length,
                tlv.len() - start
            );
            break;
        }

        extensions.push(decode_extension(extension_type, &tlv[start..end]));
        offset = end;
    }

    extensions
}

/// Decodes all extensions of a raw mint account.
pub fn extensions_from_mint(mint_data: &[u8]) -> Vec<TokenExtension> {
    tlv_region(mint_data).map(parse_extensions).unwrap_or_default()
}

fn decode_extension(extension_type: u16, value: &[u8]) -> TokenExtension {
    let decoded = match extension_type {
        EXTENSION_TRANSFER_FEE_CONFIG => decode_transfer_fee(value),
        EXTENSION_NON_TRANSFERABLE => Some(TokenExtension::NonTransferable),
        EXTENSION_PERMANENT_DELEGATE => read_pubkey(value, 0)
            .map(|delegate| TokenExtension::PermanentDelegate { delegate }),
        EXTENSION_TRANSFER_HOOK => read_pubkey(value, 32)
            .map(|program_id| TokenExtension::TransferHook { program_id }),
        _ => None,
    };
    decoded.unwrap_or(TokenExtension::Other { extension_type })
}

fn decode_transfer_fee(value: &[u8]) -> Option<TokenExtension> {
    if value.len() < TRANSFER_FEE_CONFIG_LEN {
        return None;
    }
    let older = read_fee(value, OLDER_FEE_OFFSET)?;
    let newer = read_fee(value, NEWER_FEE_OFFSET)?;
    // The newer fee applies from its epoch on; report whichever is harsher.
    let (maximum_fee, basis_points) = if older.1 > newer.1 { older } else { newer };
    Some(TokenExtension::TransferFee {
        basis_points,
        maximum_fee,
    })
}

/// Reads `(maximum_fee, basis_points)` of a TransferFee record at `offset`.
fn read_fee(value: &[u8], offset: usize) -> Option<(u64, u16)> {
    let max_fee = value.get(offset + 8..offset + 16)?;
    let bps = value.get(offset + 16..offset + 18)?;
    Some((
        u64::from_le_bytes(max_fee.try_into().ok()?),
        u16::from_le_bytes(bps.try_into().ok()?),
    ))
}

/// Reads an optional non-zero pubkey; all-zero keys decode as `None`.
fn read_pubkey(value: &[u8], offset: usize) -> Option<Option<Address>> {
    let bytes: [u8; 32] = value.get(offset..offset + 32)?.try_into().ok()?;
    if bytes.iter().all(|b| *b == 0) {
        return Some(None);
    }
    Some(Some(Pubkey::new_from_array(bytes).to_string()))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn entry(extension_type: u16, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(TLV_HEADER_LEN + value.len());
        out.extend_from_slice(&extension_type.to_le_bytes());
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
        out.extend_from_slice(value);
        out
    }

    pub fn transfer_fee_value(bps: u16, max_fee: u64) -> Vec<u8> {
        let mut value = vec![0u8; TRANSFER_FEE_CONFIG_LEN];
        value[NEWER_FEE_OFFSET + 8..NEWER_FEE_OFFSET + 16].copy_from_slice(&max_fee.to_le_bytes());
        value[NEWER_FEE_OFFSET + 16..NEWER_FEE_OFFSET + 18].copy_from_slice(&bps.to_le_bytes());
        value
    }

    pub fn mint_with_tlv(tlv: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; ACCOUNT_TYPE_OFFSET];
        data.push(ACCOUNT_TYPE_MINT);
        data.extend_from_slice(tlv);
        data
    }
}
