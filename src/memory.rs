//! Memory and variable helpers built on [`RpcSession::send`]
//!
//! Addresses and values always go out as lowercase `0x` hex with no padding.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::error::{Result, RpcError};
use crate::session::RpcSession;

/// A word value as carried on the wire
pub type Word = u64;

/// Access width for `read_memory` / `write_memory`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordWidth {
    Bits8,
    Bits16,
    Bits32,
    Bits64,
}

impl WordWidth {
    pub fn bits(self) -> u32 {
        match self {
            WordWidth::Bits8 => 8,
            WordWidth::Bits16 => 16,
            WordWidth::Bits32 => 32,
            WordWidth::Bits64 => 64,
        }
    }

    /// Largest value that fits in one word of this width
    pub fn max_value(self) -> Word {
        match self {
            WordWidth::Bits64 => u64::MAX,
            other => (1u64 << other.bits()) - 1,
        }
    }
}

impl TryFrom<u32> for WordWidth {
    type Error = RpcError;

    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(WordWidth::Bits8),
            16 => Ok(WordWidth::Bits16),
            32 => Ok(WordWidth::Bits32),
            64 => Ok(WordWidth::Bits64),
            other => Err(RpcError::InvalidArgument(format!(
                "Unsupported word width: {} (expected 8, 16, 32 or 64)",
                other
            ))),
        }
    }
}

impl fmt::Display for WordWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RpcSession<S> {
    /// Read one 32-bit word with `mdw`.
    ///
    /// Returns `Ok(None)` when the reply carries no `"<addr>: <value>"` field,
    /// which is how OpenOCD reports e.g. an unreadable address.
    pub async fn read_variable(&mut self, address: u64) -> Result<Option<Word>> {
        let reply = self.send(&format!("mdw {}", format_hex(address))).await?;
        let value = parse_variable_reply(&reply)?;
        if value.is_none() {
            debug!("No value in mdw reply for {}: {}", format_hex(address), reply.trim());
        }
        Ok(value)
    }

    /// Write one 32-bit word with `mww`.
    pub async fn write_variable(&mut self, address: u64, value: u32) -> Result<()> {
        self.send(&format!(
            "mww {} {}",
            format_hex(address),
            format_hex(value as Word)
        ))
        .await?;
        Ok(())
    }

    /// Read `count` words of `width` starting at `address`.
    pub async fn read_memory(
        &mut self,
        width: WordWidth,
        address: u64,
        count: u32,
    ) -> Result<Vec<Word>> {
        let reply = self
            .send(&format!(
                "read_memory {} {} {}",
                format_hex(address),
                width.bits(),
                count
            ))
            .await?;

        let words = parse_word_list(&reply)?;
        if words.len() != count as usize {
            return Err(RpcError::DecodeFailed(format!(
                "Expected {} words from read_memory, got {}: '{}'",
                count,
                words.len(),
                reply.trim()
            )));
        }
        Ok(words)
    }

    /// Write `data` as consecutive words of `width` starting at `address`.
    pub async fn write_memory(&mut self, width: WordWidth, address: u64, data: &[Word]) -> Result<()> {
        if let Some(value) = data.iter().find(|&&v| v > width.max_value()) {
            return Err(RpcError::InvalidArgument(format!(
                "Value {} does not fit in {} bits",
                format_hex(*value),
                width
            )));
        }

        self.send(&format!(
            "write_memory {} {} {}",
            format_hex(address),
            width.bits(),
            format_word_list(data)
        ))
        .await?;
        Ok(())
    }

    /// Run `command` under `capture` and return what it printed.
    pub async fn capture(&mut self, command: &str) -> Result<String> {
        self.send(&format!("capture {{ {} }}", command)).await
    }
}

/// Render a value the way OpenOCD expects it: `0x` + lowercase hex.
pub fn format_hex(value: Word) -> String {
    format!("0x{:x}", value)
}

/// Brace-delimited TCL list of hex literals, e.g. `{0x1 0x0 0xffff}`
pub fn format_word_list(data: &[Word]) -> String {
    let items: Vec<String> = data.iter().map(|&w| format_hex(w)).collect();
    format!("{{{}}}", items.join(" "))
}

/// Parse a hex token, with or without a `0x` prefix.
pub fn parse_hex(token: &str) -> Result<Word> {
    let token = token.trim();
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);

    Word::from_str_radix(digits, 16)
        .map_err(|e| RpcError::DecodeFailed(format!("Invalid hex value '{}': {}", token, e)))
}

/// Parse whitespace-separated hex tokens.
pub fn parse_word_list(reply: &str) -> Result<Vec<Word>> {
    reply.split_whitespace().map(parse_hex).collect()
}

/// Extract the value from an `mdw` reply such as `0x10000000: deadc0de `.
pub fn parse_variable_reply(reply: &str) -> Result<Option<Word>> {
    let Some((_, field)) = reply.split_once(": ") else {
        return Ok(None);
    };
    match field.split_whitespace().next() {
        Some(token) => parse_hex(token).map(Some),
        None => Ok(None),
    }
}

/// Parse a user-supplied address or value (e.g., "0x10000000" or plain number)
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| RpcError::InvalidArgument(format!("Invalid hex address '{}': {}", s, e)))
    } else {
        s.parse::<u64>()
            .map_err(|e| RpcError::InvalidArgument(format!("Invalid address '{}': {}", s, e)))
    }
}
