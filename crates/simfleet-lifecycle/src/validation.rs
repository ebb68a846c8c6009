//! Format validation for SIM identifiers.
//!
//! Formats follow the relevant numbering standards loosely: lengths and
//! character classes are enforced, checksum digits are not.

use crate::error::SimError;

/// Validate an ICCID: 19 or 20 ASCII digits.
pub fn validate_iccid(iccid: &str) -> Result<(), SimError> {
    if !(19..=20).contains(&iccid.len()) || !iccid.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SimError::Validation(
            "ICCID must be 19-20 digits".to_string(),
        ));
    }
    Ok(())
}

/// Validate an IMSI: 14 or 15 ASCII digits.
pub fn validate_imsi(imsi: &str) -> Result<(), SimError> {
    if !(14..=15).contains(&imsi.len()) || !imsi.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SimError::Validation("IMSI must be 14-15 digits".to_string()));
    }
    Ok(())
}

/// Validate an MSISDN: optional leading `+`, then 8 to 15 digits.
pub fn validate_msisdn(msisdn: &str) -> Result<(), SimError> {
    let digits = msisdn.strip_prefix('+').unwrap_or(msisdn);
    if !(8..=15).contains(&digits.len()) || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SimError::Validation(
            "MSISDN must be 8-15 digits with optional leading +".to_string(),
        ));
    }
    Ok(())
}

/// Validate an IMEI: 14 to 16 ASCII digits.
pub fn validate_imei(imei: &str) -> Result<(), SimError> {
    if !(14..=16).contains(&imei.len()) || !imei.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SimError::Validation("IMEI must be 14-16 digits".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iccid_lengths() {
        assert!(validate_iccid("8941000000000000001").is_ok()); // 19
        assert!(validate_iccid("89410000000000000012").is_ok()); // 20
        assert!(validate_iccid("894100000000000001").is_err()); // 18
        assert!(validate_iccid("894100000000000000123").is_err()); // 21
    }

    #[test]
    fn test_iccid_rejects_non_digits() {
        assert!(validate_iccid("89410000000000000ab").is_err());
        assert!(validate_iccid("8941 000000000000001").is_err());
    }

    #[test]
    fn test_imsi() {
        assert!(validate_imsi("26201123456789").is_ok()); // 14
        assert!(validate_imsi("262011234567890").is_ok()); // 15
        assert!(validate_imsi("2620112345678").is_err()); // 13
        assert!(validate_imsi("26201123456789x").is_err());
    }

    #[test]
    fn test_msisdn_plus_prefix_optional() {
        assert!(validate_msisdn("+4915112345678").is_ok());
        assert!(validate_msisdn("4915112345678").is_ok());
        assert!(validate_msisdn("12345678").is_ok()); // 8, minimum
        assert!(validate_msisdn("1234567").is_err()); // 7
        assert!(validate_msisdn("+").is_err());
        assert!(validate_msisdn("+49151x2345678").is_err());
    }

    #[test]
    fn test_imei() {
        assert!(validate_imei("35847509123456").is_ok()); // 14
        assert!(validate_imei("358475091234567").is_ok()); // 15
        assert!(validate_imei("3584750912345678").is_ok()); // 16
        assert!(validate_imei("3584750912345").is_err()); // 13
        assert!(validate_imei("35847509123456789").is_err()); // 17
    }
}
