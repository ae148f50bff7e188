use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Asset {
    BTC,
    ETH,
    USDT,
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl FromStr for Asset {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BTC" => Ok(Asset::BTC),
            "ETH" => Ok(Asset::ETH),
            "USDT" => Ok(Asset::USDT),
            _ => Err(format!("unsupported asset: `{}`", s)),
        }
    }
}

/// A trading pair: base/quote, serialized as its exchange code ("BTCUSDT").
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Pair {
    /// The asset being bought or sold
    pub base: Asset,
    /// The asset paid or received
    pub quote: Asset,
}

impl Pair {
    /// Exchange symbol code, e.g. "BTCUSDT"
    pub fn code(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }

    /// Lower-case name used in market-data stream paths, e.g. "btcusdt"
    pub fn stream_name(&self) -> String {
        self.code().to_lowercase()
    }

    /// crypto/USDT spot pairs
    pub const fn crypto_usdt(base: Asset) -> Self {
        Pair {
            base,
            quote: Asset::USDT,
        }
    }

    pub fn supported() -> &'static [Pair] {
        &[BTC_USDT, ETH_USDT]
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

impl FromStr for Pair {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.to_ascii_uppercase();
        Pair::supported()
            .iter()
            .find(|p| p.code() == wanted)
            .copied()
            .ok_or_else(|| format!("unsupported symbol: `{}`", s))
    }
}

impl TryFrom<String> for Pair {
    type Error = String;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Pair> for String {
    fn from(p: Pair) -> Self {
        p.code()
    }
}

pub const BTC_USDT: Pair = Pair::crypto_usdt(Asset::BTC);
pub const ETH_USDT: Pair = Pair::crypto_usdt(Asset::ETH);
