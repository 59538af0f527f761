use serde::{
    de::{Error, Visitor},
    Deserialize, Deserializer, Serialize, Serializer,
};
use std::fmt;
use std::str::FromStr;

const CENTS_PER_USDT: u64 = 100;

/// Represents a USDT amount. Internally held as integer cents so arithmetic
/// stays exact, converted to a two-decimal `String` in json messages
/// ("20.00").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Usdt(pub u64);

impl Usdt {
    /// Constructs a new `Usdt` from an integer number of cents.
    pub const fn from_cents(cents: u64) -> Self {
        Usdt(cents)
    }

    /// Constructs a new `Usdt` from whole USDT units.
    pub const fn from_whole(units: u64) -> Self {
        Usdt(units * CENTS_PER_USDT)
    }

    /// Returns the amount in cents. Is the inner value of `Usdt`.
    pub fn cents(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn saturating_sub(&self, other: Usdt) -> Usdt {
        Usdt(self.0.saturating_sub(other.0))
    }

    pub fn checked_add(&self, other: Usdt) -> Option<Usdt> {
        self.0.checked_add(other.0).map(Usdt)
    }
}

impl fmt::Display for Usdt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / CENTS_PER_USDT, self.0 % CENTS_PER_USDT)
    }
}

impl Serialize for Usdt {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

struct UsdtVisitor;

impl<'de> Visitor<'de> for UsdtVisitor {
    type Value = Usdt;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a string formatted as '<units>' or '<units>.<cents>' with at most two decimals")
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        let (units_part, cents_part) = match value.split_once('.') {
            Some((units, frac)) => (units, Some(frac)),
            None => (value, None),
        };

        let units = units_part.parse::<u64>().map_err(|e| {
            Error::custom(format!(
                "Failed to parse '{}' as u64 (from '{}'): {}",
                units_part, value, e
            ))
        })?;

        let cents = match cents_part {
            None => 0,
            Some(frac) if frac.len() == 1 || frac.len() == 2 => {
                let parsed = frac.parse::<u64>().map_err(|e| {
                    Error::custom(format!(
                        "Failed to parse '{}' as u64 (from '{}'): {}",
                        frac, value, e
                    ))
                })?;
                if frac.len() == 1 {
                    parsed * 10
                } else {
                    parsed
                }
            }
            Some(frac) => {
                return Err(Error::custom(format!(
                    "Expected at most two decimal places, found '{}' in '{}'",
                    frac, value
                )));
            }
        };

        let total = units
            .checked_mul(CENTS_PER_USDT)
            .and_then(|c| c.checked_add(cents))
            .ok_or_else(|| {
                Error::custom(format!("USDT value '{}' too large, overflows cents", value))
            })?;
        Ok(Usdt(total))
    }

    // other visit methods returning invalid_type errors.
    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Err(Error::invalid_type(
            serde::de::Unexpected::Unsigned(v),
            &self,
        ))
    }
    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: Error,
    {
        Err(Error::invalid_type(serde::de::Unexpected::Float(v), &self))
    }
    fn visit_borrowed_str<E>(self, v: &'de str) -> Result<Self::Value, E>
    where
        E: Error,
    {
        self.visit_str(v)
    }
    fn visit_string<E>(self, v: String) -> Result<Self::Value, E>
    where
        E: Error,
    {
        self.visit_str(&v)
    }
}

impl<'de> Deserialize<'de> for Usdt {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_str(UsdtVisitor)
    }
}

/// Identifies a wallet app in the selection grid. Ids the catalog does not
/// know are treated as self-custody wallets so hosts can extend the grid
/// without touching the flow rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WalletId(pub String);

impl WalletId {
    pub fn new(id: impl Into<String>) -> Self {
        WalletId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn kind(&self) -> WalletKind {
        WALLET_CATALOG
            .iter()
            .find(|w| w.id == self.0)
            .map(|w| w.kind)
            .unwrap_or(WalletKind::SelfCustody)
    }

    /// Custodial wallets route through the hybrid custody step instead of the
    /// sandbox intercept.
    pub fn is_custodial(&self) -> bool {
        self.kind() == WalletKind::Custodial
    }

    /// The address-transfer pseudo wallet skips connection entirely.
    pub fn is_transfer(&self) -> bool {
        self.kind() == WalletKind::Transfer
    }
}

impl fmt::Display for WalletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WalletId {
    fn from(id: &str) -> Self {
        WalletId(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    SelfCustody,
    Custodial,
    Transfer,
}

#[derive(Debug, Clone, Copy)]
pub struct WalletInfo {
    pub id: &'static str,
    pub name: &'static str,
    pub kind: WalletKind,
}

/// The wallet grid inventory. Order matches the selection grid; hosts render
/// the first nine and a view-all affordance.
pub const WALLET_CATALOG: &[WalletInfo] = &[
    WalletInfo { id: "metamask", name: "MetaMask", kind: WalletKind::SelfCustody },
    WalletInfo { id: "walletconnect", name: "WalletConnect", kind: WalletKind::SelfCustody },
    WalletInfo { id: "binance", name: "Binance Wallet", kind: WalletKind::Custodial },
    WalletInfo { id: "okx", name: "OKX Wallet", kind: WalletKind::SelfCustody },
    WalletInfo { id: "bitget", name: "Bitget Wallet", kind: WalletKind::SelfCustody },
    WalletInfo { id: "trust", name: "Trust Wallet", kind: WalletKind::SelfCustody },
    WalletInfo { id: "coinbase", name: "Coinbase Wallet", kind: WalletKind::SelfCustody },
    WalletInfo { id: "imtoken", name: "imToken", kind: WalletKind::SelfCustody },
    WalletInfo { id: "tokenpocket", name: "TokenPocket", kind: WalletKind::SelfCustody },
    WalletInfo { id: "tronlink", name: "TronLink", kind: WalletKind::SelfCustody },
    WalletInfo { id: "phantom", name: "Phantom", kind: WalletKind::SelfCustody },
    WalletInfo { id: "coolwallet", name: "CoolWallet", kind: WalletKind::SelfCustody },
    WalletInfo { id: "binance_web3", name: "Binance Web3", kind: WalletKind::Custodial },
    WalletInfo { id: "transfer", name: "Transfer Pay", kind: WalletKind::Transfer },
];

/// Networks the checkout can settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Bsc,
    Polygon,
    Tron,
    Avalanche,
}

impl Chain {
    pub const ALL: [Chain; 5] = [
        Chain::Ethereum,
        Chain::Bsc,
        Chain::Polygon,
        Chain::Tron,
        Chain::Avalanche,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Chain::Ethereum => "eth",
            Chain::Bsc => "bsc",
            Chain::Polygon => "polygon",
            Chain::Tron => "tron",
            Chain::Avalanche => "avax",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Chain::Ethereum => "Ethereum",
            Chain::Bsc => "BSC",
            Chain::Polygon => "Polygon",
            Chain::Tron => "TRON",
            Chain::Avalanche => "Avalanche",
        }
    }

    /// Token standard used when paying by plain address transfer.
    pub fn transfer_protocol(&self) -> &'static str {
        match self {
            Chain::Ethereum => "erc20",
            Chain::Bsc => "bep20",
            Chain::Polygon => "polygon",
            Chain::Tron => "trc20",
            Chain::Avalanche => "avalanche",
        }
    }

    /// TRON addresses are base58 "T..." strings, everything else is EVM hex.
    pub fn is_tron(&self) -> bool {
        matches!(self, Chain::Tron)
    }

    /// Demo account balance shown in the chain picker.
    pub fn usdt_balance(&self) -> Usdt {
        match self {
            Chain::Ethereum => Usdt::from_cents(204_500),
            Chain::Bsc => Usdt::from_cents(45_000),
            Chain::Polygon => Usdt::from_cents(12_850),
            Chain::Tron => Usdt::from_cents(120_000),
            Chain::Avalanche => Usdt::from_cents(0),
        }
    }

    /// Rough confirmation latency shown in the chain picker.
    pub fn confirmation_eta(&self) -> &'static str {
        match self {
            Chain::Ethereum => "~18s",
            Chain::Bsc => "~3s",
            Chain::Polygon => "~2s",
            Chain::Tron => "~1s",
            Chain::Avalanche => "~1s",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChain(pub String);

impl fmt::Display for UnknownChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown chain id: {}", self.0)
    }
}

impl std::error::Error for UnknownChain {}

impl FromStr for Chain {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eth" => Ok(Chain::Ethereum),
            "bsc" => Ok(Chain::Bsc),
            "polygon" => Ok(Chain::Polygon),
            "tron" => Ok(Chain::Tron),
            "avax" => Ok(Chain::Avalanche),
            other => Err(UnknownChain(other.to_string())),
        }
    }
}

/// A deposit address handed out for the address-transfer path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositAddress {
    pub chain: Chain,
    pub address: String,
    pub protocol: String,
}

/// One detected incoming payment in the transfer ledger.
///
/// `time` is a wall-clock "HH:MM:SS" stamp taken when the payment was seen;
/// ids count up "tx1", "tx2", ... in detection order. The ledger is kept
/// oldest-first, newest-first display is up to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub amount: Usdt,
    pub time: String,
    pub hash: String,
}

/// The order this checkout session collects payment for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderInfo {
    pub merchant: String,
    pub order_id: String,
    pub total: Usdt,
}

impl OrderInfo {
    /// Deep-link payload encoded into the exchange panel QR code.
    pub fn payment_uri(&self, wallet: &WalletId) -> String {
        format!("bonuspay://pay/{}/order/{}", wallet, self.order_id)
    }
}

impl Default for OrderInfo {
    fn default() -> Self {
        OrderInfo {
            merchant: "BonusPay Global".to_string(),
            order_id: "123456".to_string(),
            total: Usdt::from_whole(20),
        }
    }
}
