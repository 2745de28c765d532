// ============================================================================
// Hex 字符串工具函数 (Hex Utilities)
// ============================================================================

pub fn strip_0x(s: &str) -> &str {
    s.trim_start_matches("0x")
}

/// 辅助函数：截断长十六进制字符串用于演示
pub fn truncate_hex(hex: &str) -> String {
    if hex.len() <= 20 {
        hex.to_string()
    } else {
        format!("{}...{}", &hex[..10], &hex[hex.len() - 10..])
    }
}

/// 秘密的可读形式：UTF-8 则原样显示，否则显示 hex
pub fn display_secret(secret: &[u8]) -> String {
    match std::str::from_utf8(secret) {
        Ok(text) => format!("{:?}", text),
        Err(_) => format!("0x{}", hex::encode(secret)),
    }
}
