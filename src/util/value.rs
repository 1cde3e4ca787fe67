use std::fmt::{Debug, Display, Formatter};
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Eq, Hash, PartialEq, Clone, Copy, Ord, PartialOrd)]
pub struct MAC(pub [u8; 6]);

impl MAC {
    pub fn of(s: &str) -> Option<MAC> {
        s.parse().ok()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MACParseError(pub String);

impl Display for MACParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid MAC address '{}'", self.0)
    }
}

impl std::error::Error for MACParseError {}

impl FromStr for MAC {
    type Err = MACParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.replace(':', "");
        let vec = hex::decode(&raw).map_err(|_| MACParseError(s.to_owned()))?;
        if vec.len() != 6 {
            return Err(MACParseError(s.to_owned()));
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&vec);
        Ok(MAC(mac))
    }
}

impl Debug for MAC {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl Display for MAC {
    fn fmt(&self, f: &mut Formatter) -> Result<(), std::fmt::Error> {
        Debug::fmt(self, f)
    }
}

impl Serialize for MAC {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MAC {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[allow(non_snake_case)]
pub fn EXACT<T: Encode>(v: T) -> InnerValue {
    InnerValue::EXACT(v.encode())
}

#[allow(non_snake_case)]
pub fn LPM<T: Encode>(v: T, prefix_len: i32) -> InnerValue {
    InnerValue::LPM(v.encode(), prefix_len)
}

#[allow(non_snake_case)]
pub fn TERNARY<T: Encode, P: Encode>(v: T, mask: P) -> InnerValue {
    InnerValue::TERNARY(v.encode(), mask.encode())
}

#[allow(non_snake_case)]
pub fn RANGE<T: Encode, P: Encode>(low: T, high: P) -> InnerValue {
    InnerValue::RANGE(low.encode(), high.encode())
}

#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum InnerValue {
    EXACT(Bytes),
    LPM(Bytes, /*prefix_len*/ i32),
    TERNARY(Bytes, /*mask*/ Bytes),
    RANGE(/*low*/ Bytes, /*high*/ Bytes),
}

impl Display for InnerValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            InnerValue::EXACT(v) => write!(f, "{}", display_bytes(v)),
            InnerValue::LPM(v, l) => write!(f, "{}/{}", display_bytes(v), l),
            InnerValue::TERNARY(v, m) => write!(f, "{}&&&{}", display_bytes(v), display_bytes(m)),
            InnerValue::RANGE(l, h) => write!(f, "{}..{}", display_bytes(l), display_bytes(h)),
        }
    }
}

pub fn encode<T: Encode>(v: T) -> InnerParamValue {
    v.encode()
}

pub type InnerParamValue = Bytes;

pub trait Encode: Copy {
    fn encode(self) -> Bytes;
}

impl Encode for Ipv4Addr {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.octets().as_ref())
    }
}

impl Encode for u32 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for u16 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for u8 {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.to_be_bytes().as_ref())
    }
}

impl Encode for MAC {
    fn encode(self) -> Bytes {
        Bytes::copy_from_slice(self.0.as_ref())
    }
}

/// Read a big-endian unsigned value of at most eight bytes.
pub fn decode_u64(value: &[u8]) -> Option<u64> {
    if value.is_empty() || value.len() > 8 {
        return None;
    }
    Some(BigEndian::read_uint(value, value.len()))
}

/// Human form of a wire value: dotted quad for 4 bytes, MAC for 6, integer otherwise.
pub fn display_bytes(value: &[u8]) -> String {
    match value.len() {
        4 => Ipv4Addr::new(value[0], value[1], value[2], value[3]).to_string(),
        6 => {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(value);
            MAC(mac).to_string()
        }
        _ => match decode_u64(value) {
            Some(v) => v.to_string(),
            None => format!("0x{}", hex::encode(value)),
        },
    }
}

/// Human form of the value of a `bitwidth`-bit field or parameter: dotted quad for 32
/// bits, MAC for 48, integer otherwise. Leading zero bytes may be missing from `value`.
pub fn display_value(value: &[u8], bitwidth: i32) -> String {
    let len = (bitwidth.max(0) as usize + 7) / 8;
    if value.len() > len {
        return display_bytes(value);
    }
    let mut padded = vec![0u8; len - value.len()];
    padded.extend_from_slice(value);
    match bitwidth {
        32 => Ipv4Addr::new(padded[0], padded[1], padded[2], padded[3]).to_string(),
        48 => {
            let mut mac = [0u8; 6];
            mac.copy_from_slice(&padded);
            MAC(mac).to_string()
        }
        _ => match decode_u64(&padded) {
            Some(v) => v.to_string(),
            None => format!("0x{}", hex::encode(&padded)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse() {
        let mac: MAC = "00:aa:bb:00:00:03".parse().unwrap();
        assert_eq!(mac.0, [0x00, 0xaa, 0xbb, 0x00, 0x00, 0x03]);
        assert_eq!(mac.to_string(), "00:aa:bb:00:00:03");
        assert!("00:aa:bb:00:00".parse::<MAC>().is_err());
        assert!("zz:aa:bb:00:00:03".parse::<MAC>().is_err());
    }

    #[test]
    fn test_mac_serde() {
        let mac: MAC = serde_json::from_str("\"00:04:00:00:00:20\"").unwrap();
        assert_eq!(mac, MAC([0, 4, 0, 0, 0, 0x20]));
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"00:04:00:00:00:20\"");
    }

    #[test]
    fn test_display_bytes() {
        assert_eq!(display_bytes(&[10, 0, 1, 10]), "10.0.1.10");
        assert_eq!(display_bytes(&[0, 3]), "3");
        assert_eq!(display_bytes(&[0, 0xaa, 0xdd, 0, 0, 1]), "00:aa:dd:00:00:01");
    }

    #[test]
    fn test_display_value_by_bitwidth() {
        // canonical form drops leading zero bytes
        assert_eq!(display_value(&[0xaa, 0xdd, 0, 0, 1], 48), "00:aa:dd:00:00:01");
        assert_eq!(display_value(&[1, 0, 1, 10], 32), "1.0.1.10");
        assert_eq!(display_value(&[0, 1, 10], 32), "0.1.0.10");
        assert_eq!(display_value(&[3], 9), "3");
        assert_eq!(display_value(&[], 9), "0");
        assert_eq!(display_value(&[10, 0, 1, 10], 16), "10.0.1.10");
    }
}
