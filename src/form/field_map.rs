use std::fmt;

use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Logical field keys understood by the binder and the worker
pub mod keys {
    pub const FULL_NAME: &str = "full_name";
    pub const DAY: &str = "day";
    pub const MONTH: &str = "month";
    pub const YEAR: &str = "year";
    pub const DATE_OF_BIRTH: &str = "date_of_birth";
    pub const PHONE_NUMBER: &str = "phone_number";
    pub const EMAIL: &str = "email";
    pub const ID_CARD: &str = "id_card";
    pub const SALES_DATE: &str = "sales_date";
    pub const SESSION: &str = "session";
    pub const AGREE_CHECKBOX: &str = "agree_checkbox";
    pub const CAPTCHA: &str = "captcha";
    pub const CAPTCHA_IMAGE: &str = "captcha_image_selector";
    pub const SUBMIT_BUTTON: &str = "submit_button";

    /// Page-driven selection fields, in fill order
    pub const SLOT_KEYS: [&str; 2] = [SALES_DATE, SESSION];

    /// Keys handled outside the generic fill loop
    pub const NON_FILL_KEYS: [&str; 3] = [CAPTCHA, CAPTCHA_IMAGE, SUBMIT_BUTTON];

    pub fn is_slot(key: &str) -> bool {
        SLOT_KEYS.contains(&key)
    }
}

/// How a locator string is resolved on the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Id(String),
    Css(String),
}

impl Locator {
    /// Plain identifiers resolve by element id, anything else is treated as a CSS selector.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let plain_id = Regex::new(r"^[A-Za-z_][A-Za-z0-9_\-:]*$")
            .map(|re| re.is_match(raw))
            .unwrap_or(false);

        if plain_id {
            Locator::Id(raw.to_string())
        } else {
            Locator::Css(raw.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Locator::Id(s) | Locator::Css(s) => s,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Css(css) => write!(f, "{}", css),
        }
    }
}

/// Ordered mapping from logical field key to a locator on the target page.
///
/// Keys with a null or blank locator are dropped on construction, so a key is either
/// present with a usable locator or absent. The map is never mutated once a run starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldMap {
    entries: Vec<(String, String)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a mapping, ignoring blank locators
    pub fn insert(&mut self, key: impl Into<String>, locator: impl Into<String>) {
        let key = key.into();
        let locator = locator.into();
        if locator.trim().is_empty() {
            return;
        }

        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = locator,
            None => self.entries.push((key, locator)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn locator(&self, key: &str) -> Option<Locator> {
        self.get(key).map(Locator::parse)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Keys in population order: slot fields first (date before session), then the rest in
    /// map order, leaving out the challenge and submit keys.
    pub fn fill_order(&self) -> Vec<&str> {
        let slots = keys::SLOT_KEYS
            .iter()
            .copied()
            .filter(|key| self.contains(key));

        let rest = self
            .entries
            .iter()
            .map(|(k, _)| k.as_str())
            .filter(|key| !keys::is_slot(key) && !keys::NON_FILL_KEYS.contains(key));

        slots.chain(rest).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (key, locator) in iter {
            map.insert(key, locator);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, locator) in self.iter() {
            map.serialize_entry(key, locator)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of field keys to element locators")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut map = FieldMap::new();
                while let Some((key, locator)) = access.next_entry::<String, Option<String>>()? {
                    if let Some(locator) = locator {
                        map.insert(key, locator);
                    }
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_parse() {
        assert_eq!(Locator::parse("txtHoTen"), Locator::Id("txtHoTen".to_string()));
        assert_eq!(Locator::parse(" slNgayBanHang "), Locator::Id("slNgayBanHang".to_string()));
        assert_eq!(Locator::parse("#dvCaptcha img"), Locator::Css("#dvCaptcha img".to_string()));
        assert_eq!(Locator::parse(".captcha"), Locator::Css(".captcha".to_string()));
    }

    #[test]
    fn test_blank_locators_are_absent() {
        let yaml = "full_name: txtHoTen\nemail: ''\nid_card: ~\nsubmit_button: btSubmit\n";
        let map: FieldMap = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(map.len(), 2);
        assert!(map.contains("full_name"));
        assert!(!map.contains("email"));
        assert!(!map.contains("id_card"));
    }

    #[test]
    fn test_fill_order_puts_slots_first() {
        let map: FieldMap = vec![
            ("full_name", "txtHoTen"),
            ("captcha", "txtCaptcha"),
            ("session", "slPhien"),
            ("email", "txtEmail"),
            ("sales_date", "slNgayBanHang"),
            ("submit_button", "btDangKy"),
            ("captcha_image_selector", "#dvCaptcha img"),
            ("agree_checkbox", "ckbDongY"),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            map.fill_order(),
            vec!["sales_date", "session", "full_name", "email", "agree_checkbox"]
        );
    }

    #[test]
    fn test_json_order_is_kept() {
        let map: FieldMap =
            serde_json::from_str(r#"{"year": "y", "day": "d", "month": "m"}"#).unwrap();
        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["year", "day", "month"]);
    }
}
