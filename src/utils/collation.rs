use crate::bson;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use unicode_properties::{GeneralCategoryGroup, UnicodeGeneralCategory};

/// Compare flags applied to string ordering, persisted in the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompareOptions(pub i32);

impl CompareOptions {
    pub const NONE: CompareOptions = CompareOptions(0);
    pub const IGNORE_CASE: CompareOptions = CompareOptions(1);
    pub const IGNORE_NON_SPACE: CompareOptions = CompareOptions(2);
    pub const IGNORE_SYMBOLS: CompareOptions = CompareOptions(4);
    pub const IGNORE_KANA_TYPE: CompareOptions = CompareOptions(8);
    pub const IGNORE_WIDTH: CompareOptions = CompareOptions(16);
    pub const ORDINAL: CompareOptions = CompareOptions(0x4000_0000);

    pub fn contains(self, other: CompareOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl Default for CompareOptions {
    fn default() -> Self {
        CompareOptions::IGNORE_CASE
    }
}

/// Culture id + compare options; controls every key comparison in the
/// engine. Persisted in the header page, immutable except through rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collation {
    pub(crate) lcid: i32,
    pub(crate) sort_options: CompareOptions,
}

/// Invariant culture, as in .NET.
const LCID_INVARIANT: i32 = 127;

impl Default for Collation {
    fn default() -> Self {
        Collation {
            lcid: LCID_INVARIANT,
            sort_options: CompareOptions::IGNORE_CASE,
        }
    }
}

impl Collation {
    pub fn new(lcid: i32, sort_options: CompareOptions) -> Self {
        Collation { lcid, sort_options }
    }

    pub fn binary() -> Self {
        Collation {
            lcid: LCID_INVARIANT,
            sort_options: CompareOptions::ORDINAL,
        }
    }

    pub fn lcid(&self) -> i32 {
        self.lcid
    }

    pub fn sort_options(&self) -> CompareOptions {
        self.sort_options
    }

    pub fn compare_strings(&self, left: &str, right: &str) -> Ordering {
        if self.sort_options.contains(CompareOptions::ORDINAL) {
            return left.cmp(right);
        }

        let left = self.fold_chars(left);
        let right = self.fold_chars(right);
        left.cmp(right)
    }

    fn fold_chars<'a>(&self, s: &'a str) -> impl Iterator<Item = char> + use<'a> {
        let options = self.sort_options;
        s.chars()
            .filter(move |&c| {
                let group = c.general_category_group();
                if options.contains(CompareOptions::IGNORE_NON_SPACE)
                    && group == GeneralCategoryGroup::Mark
                {
                    return false;
                }
                if options.contains(CompareOptions::IGNORE_SYMBOLS)
                    && (group == GeneralCategoryGroup::Symbol
                        || group == GeneralCategoryGroup::Punctuation)
                {
                    return false;
                }
                true
            })
            .flat_map(move |c| {
                let folded = if options.contains(CompareOptions::IGNORE_CASE) {
                    Some(c.to_lowercase())
                } else {
                    None
                };
                match folded {
                    Some(iter) => either::Either::Left(iter),
                    None => either::Either::Right(std::iter::once(c)),
                }
            })
    }

    /// Total order over bson values: type order first, then value order
    /// inside the type family (all numeric types compare numerically).
    pub fn compare(&self, left: &bson::Value, right: &bson::Value) -> Ordering {
        use bson::Value;

        if let (Some(l), Some(r)) = (numeric_rank(left), numeric_rank(right)) {
            return compare_numeric(l, r);
        }

        let (lt, rt) = (type_order(left), type_order(right));
        if lt != rt {
            return lt.cmp(&rt);
        }

        match (left, right) {
            (Value::MinValue, Value::MinValue) => Ordering::Equal,
            (Value::MaxValue, Value::MaxValue) => Ordering::Equal,
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::String(l), Value::String(r)) => self.compare_strings(l, r),
            (Value::Boolean(l), Value::Boolean(r)) => l.cmp(r),
            (Value::DateTime(l), Value::DateTime(r)) => l.cmp(r),
            (Value::ObjectId(l), Value::ObjectId(r)) => l.cmp(r),
            (Value::Guid(l), Value::Guid(r)) => l.cmp(r),
            (Value::Binary(l), Value::Binary(r)) => l.bytes().cmp(r.bytes()),
            (Value::Array(l), Value::Array(r)) => {
                for (lv, rv) in l.iter().zip(r.iter()) {
                    let ord = self.compare(lv, rv);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                l.len().cmp(&r.len())
            }
            (Value::Document(l), Value::Document(r)) => {
                for ((lk, lv), (rk, rv)) in l.iter().zip(r.iter()) {
                    let ord = lk.cmp(rk).then_with(|| self.compare(lv, rv));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                l.len().cmp(&r.len())
            }
            (Value::Vector(l), Value::Vector(r)) => {
                for (lv, rv) in l.as_f32().iter().zip(r.as_f32().iter()) {
                    let ord = lv.total_cmp(rv);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                l.len().cmp(&r.len())
            }
            _ => unreachable!("type order must separate distinct types"),
        }
    }
}

fn type_order(value: &bson::Value) -> u8 {
    use bson::Value;
    match value {
        Value::MinValue => 0,
        Value::Null => 1,
        // all numbers share rank 2 through numeric_rank
        Value::Int32(_) | Value::Int64(_) | Value::Double(_) | Value::Decimal(_) => 2,
        Value::String(_) => 3,
        Value::Document(_) => 4,
        Value::Array(_) => 5,
        Value::Binary(_) => 6,
        Value::ObjectId(_) => 7,
        Value::Guid(_) => 8,
        Value::Boolean(_) => 9,
        Value::DateTime(_) => 10,
        Value::Vector(_) => 11,
        Value::MaxValue => 12,
    }
}

enum Numeric {
    Integer(i64),
    Float(f64),
}

fn numeric_rank(value: &bson::Value) -> Option<Numeric> {
    use bson::Value;
    match value {
        Value::Int32(v) => Some(Numeric::Integer(*v as i64)),
        Value::Int64(v) => Some(Numeric::Integer(*v)),
        Value::Double(v) => Some(Numeric::Float(*v)),
        Value::Decimal(v) => Some(Numeric::Float(v.to_f64())),
        _ => None,
    }
}

fn compare_numeric(left: Numeric, right: Numeric) -> Ordering {
    match (left, right) {
        (Numeric::Integer(l), Numeric::Integer(r)) => l.cmp(&r),
        (Numeric::Integer(l), Numeric::Float(r)) => (l as f64).total_cmp(&r),
        (Numeric::Float(l), Numeric::Integer(r)) => l.total_cmp(&(r as f64)),
        (Numeric::Float(l), Numeric::Float(r)) => l.total_cmp(&r),
    }
}

impl fmt::Display for Collation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.lcid, self.sort_options.0)
    }
}

impl FromStr for Collation {
    type Err = crate::Error;

    /// Parses `"<lcid>/<compare-options>"`; both parts numeric, the options
    /// part optional.
    fn from_str(s: &str) -> crate::Result<Self> {
        let (lcid, options) = match s.split_once('/') {
            Some((l, r)) => (l, Some(r)),
            None => (s, None),
        };

        let parse = |v: &str| {
            v.trim()
                .parse::<i32>()
                .map_err(|_| crate::Error::new(crate::ErrorKind::Unsupported, "invalid collation"))
        };

        Ok(Collation {
            lcid: parse(lcid)?,
            sort_options: options
                .map(parse)
                .transpose()?
                .map(CompareOptions)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bson::Value;

    #[test]
    fn default_is_case_insensitive() {
        let collation = Collation::default();
        assert_eq!(collation.compare_strings("John", "JOHN"), Ordering::Equal);
        assert_eq!(collation.compare_strings("alpha", "beta"), Ordering::Less);
    }

    #[test]
    fn ordinal_is_case_sensitive() {
        let collation = Collation::binary();
        assert_ne!(collation.compare_strings("John", "JOHN"), Ordering::Equal);
    }

    #[test]
    fn numbers_compare_across_types() {
        let collation = Collation::default();
        assert_eq!(
            collation.compare(&Value::Int32(3), &Value::Double(3.0)),
            Ordering::Equal
        );
        assert_eq!(
            collation.compare(&Value::Int64(2), &Value::Double(2.5)),
            Ordering::Less
        );
    }

    #[test]
    fn min_and_max_bracket_everything() {
        let collation = Collation::default();
        for value in [
            Value::Null,
            Value::Int32(0),
            Value::String("x".into()),
            Value::Boolean(true),
        ] {
            assert_eq!(
                collation.compare(&Value::MinValue, &value),
                Ordering::Less
            );
            assert_eq!(
                collation.compare(&Value::MaxValue, &value),
                Ordering::Greater
            );
        }
    }

    #[test]
    fn parse_roundtrip() {
        let collation: Collation = "127/1".parse().unwrap();
        assert_eq!(collation, Collation::default());
        assert_eq!(collation.to_string(), "127/1");
    }
}
