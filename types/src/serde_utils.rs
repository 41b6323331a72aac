//! Serde helpers for the quirks of the Eth Beacon Node API:
//! integers are transmitted as decimal strings and byte blobs as
//! `0x`-prefixed hexadecimal strings.
//!
//! Every quoted integer this workspace reads is a `u64` alias and every
//! format in play is JSON, so the helpers are deliberately non-generic.
//! Deserialization also accepts native numbers, which some tooling emits
//! in place of the spec-mandated strings.

pub mod quoted_u64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Quoted {
        String(String),
        Native(u64),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        match Quoted::deserialize(deserializer)? {
            Quoted::String(string) => string.parse().map_err(D::Error::custom),
            Quoted::Native(value) => Ok(value),
        }
    }

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }
}

pub mod quoted_u64_sequence {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    struct Element(#[serde(with = "super::quoted_u64")] u64);

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
        let elements = Vec::<Element>::deserialize(deserializer)?;
        Ok(elements.into_iter().map(|Element(value)| value).collect())
    }

    pub fn serialize<S: Serializer>(values: &[u64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().copied().map(Element))
    }
}

pub mod prefixed_hex {
    use serde::{de::Error as _, Deserialize as _, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let string = String::deserialize(deserializer)?;
        let digits = string.strip_prefix("0x").unwrap_or(&string);

        if digits.len() % 2 != 0 {
            return Err(D::Error::custom("hex string has an odd number of digits"));
        }

        (0..digits.len())
            .step_by(2)
            .map(|position| {
                u8::from_str_radix(&digits[position..position + 2], 16).map_err(D::Error::custom)
            })
            .collect()
    }

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let mut string = String::with_capacity(2 + bytes.len() * 2);
        string.push_str("0x");

        for byte in bytes {
            string.push_str(&format!("{byte:02x}"));
        }

        serializer.serialize_str(&string)
    }
}
