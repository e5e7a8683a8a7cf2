//! Human-readable decoding of on-chain swap failures.

use crate::error::OnChainFailure;

/// Jupiter v6 aggregator program errors (Anchor custom codes).
const AGGREGATOR_ERRORS: &[(u32, &str, &str)] = &[
    (6000, "EmptyRoute", "the route is empty"),
    (6001, "SlippageToleranceExceeded", "output fell below the minimum (price moved beyond slippage)"),
    (6002, "InvalidCalculation", "invalid swap calculation"),
    (6003, "MissingPlatformFeeAccount", "platform fee account missing"),
    (6004, "InvalidSlippage", "invalid slippage setting"),
    (6005, "NotEnoughPercent", "route percentages do not add up to 100"),
    (6006, "InvalidInputIndex", "invalid route input index"),
    (6007, "InvalidOutputIndex", "invalid route output index"),
    (6008, "NotEnoughAccountKeys", "not enough account keys for the route"),
    (6009, "NonZeroMinimumOutAmountNotSupported", "non-zero minimum output not supported by this route"),
    (6010, "InvalidRoutePlan", "invalid route plan"),
    (6011, "InvalidReferralAuthority", "invalid referral authority"),
    (6012, "LedgerTokenAccountDoesNotMatch", "token ledger account mismatch"),
    (6013, "InvalidTokenLedger", "invalid token ledger"),
    (6014, "IncorrectTokenProgramID", "incorrect token program id"),
    (6015, "TokenProgramNotProvided", "token program not provided"),
    (6016, "SwapNotSupported", "swap not supported by this route"),
    (6017, "ExactOutAmountNotMatched", "exact output amount not matched"),
];

/// SPL Token / Token-2022 program errors.
const TOKEN_PROGRAM_ERRORS: &[(u32, &str, &str)] = &[
    (0, "NotRentExempt", "account is not rent exempt"),
    (1, "InsufficientFunds", "insufficient token balance"),
    (2, "InvalidMint", "invalid mint"),
    (3, "MintMismatch", "account does not belong to this mint"),
    (4, "OwnerMismatch", "token account owner mismatch"),
    (5, "FixedSupply", "mint has a fixed supply"),
    (6, "AlreadyInUse", "account already in use"),
    (9, "UninitializedState", "account is not initialized"),
    (12, "InvalidInstruction", "invalid instruction"),
    (13, "InvalidState", "invalid account state"),
    (14, "Overflow", "arithmetic overflow"),
    (17, "AccountFrozen", "token account is frozen (freeze authority in use)"),
    (18, "MintDecimalsMismatch", "mint decimals mismatch"),
];

/// Name and meaning of a custom program error code, if known.
pub fn lookup(code: u32) -> Option<(&'static str, &'static str)> {
    let table = if code >= 6000 {
        AGGREGATOR_ERRORS
    } else {
        TOKEN_PROGRAM_ERRORS
    };
    table
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, meaning)| (*name, *meaning))
}

/// Renders a failure as a one-line message, falling back to the raw code.
pub fn describe_failure(failure: &OnChainFailure) -> String {
    let location = failure
        .instruction_index
        .map(|index| format!("instruction {}: ", index))
        .unwrap_or_default();

    match failure.code {
        Some(code) => match lookup(code) {
            Some((name, meaning)) => format!("{}{} ({}, code {} / {:#x})", location, meaning, name, code, code),
            None => format!("{}unknown program error code {} ({:#x})", location, code, code),
        },
        None => format!("{}{}", location, failure.raw),
    }
}

/// The last `keep` log lines.
pub fn tail_logs(mut logs: Vec<String>, keep: usize) -> Vec<String> {
    if logs.len() > keep {
        logs.drain(..logs.len() - keep);
    }
    logs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_codes() {
        let failure = OnChainFailure::new(Some(3), Some(6001), "InstructionError(3, Custom(6001))");
        let message = describe_failure(&failure);
        assert!(message.starts_with("instruction 3: "));
        assert!(message.contains("SlippageToleranceExceeded"));
        assert!(message.contains("0x1771"));

        assert_eq!(lookup(17).map(|(name, _)| name), Some("AccountFrozen"));
    }

    #[test]
    fn test_unknown_code_falls_back_to_raw_code() {
        let failure = OnChainFailure::new(Some(1), Some(4242), "InstructionError(1, Custom(4242))");
        assert_eq!(describe_failure(&failure), "instruction 1: unknown program error code 4242 (0x1092)");
    }

    #[test]
    fn test_non_custom_error_uses_raw_text() {
        let failure = OnChainFailure::new(None, None, "InsufficientFundsForRent { account_index: 2 }");
        assert_eq!(describe_failure(&failure), "InsufficientFundsForRent { account_index: 2 }");
    }

    #[test]
    fn test_tail_logs() {
        let logs: Vec<String> = (0..15).map(|i| format!("line {}", i)).collect();
        let tail = tail_logs(logs, 10);
        assert_eq!(tail.len(), 10);
        assert_eq!(tail[0], "line 5");
        assert_eq!(tail_logs(vec!["a".into()], 10), vec!["a".to_string()]);
    }
}
