use std::collections::BTreeMap;
use std::fmt;

/// A single named parameter of a [`Fingerprint`].
///
/// Floats are stored by their normalized bit pattern so that coordinates can
/// take part in hashing: `-0.0` and `0.0` are the same parameter, and every
/// NaN collapses to one canonical NaN.
///
/// # Examples
///
/// ```
/// use querylito_core::Param;
///
/// assert_eq!(Param::from(0.0), Param::from(-0.0));
/// assert_eq!(Param::from("paris"), Param::Str("paris".to_string()));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Param {
    Bool(bool),
    Int(i64),
    Float(u64),
    Str(String),
}

impl Param {
    /// Builds a float parameter from its numeric value.
    pub fn float(value: f64) -> Self {
        let normalized = if value == 0.0 {
            0.0
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        Param::Float(normalized.to_bits())
    }

    /// Returns the float value if this is a float parameter.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Param::Float(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Param::Bool(value) => write!(f, "{value}"),
            Param::Int(value) => write!(f, "{value}"),
            Param::Float(bits) => write!(f, "{}", f64::from_bits(*bits)),
            Param::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Param::Bool(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Int(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Param::Int(value.into())
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Param::Int(value.into())
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Param::float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Str(value.to_string())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Param::Str(value)
    }
}

/// Canonical identifier of a logical request.
///
/// A fingerprint is a request family plus a set of named parameters.
/// Parameters are kept sorted by name, so two fingerprints built with the
/// same parameters in a different order are equal and hash the same.
///
/// # Examples
///
/// ```
/// use querylito_core::Fingerprint;
///
/// let a = Fingerprint::new("weather").with("lat", 51.5).with("lon", -0.13);
/// let b = Fingerprint::new("weather").with("lon", -0.13).with("lat", 51.5);
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "weather[lat=51.5, lon=-0.13]");
///
/// let ip = Fingerprint::new("ipLocation");
/// assert_eq!(ip.to_string(), "ipLocation");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    family: String,
    params: BTreeMap<String, Param>,
}

impl Fingerprint {
    /// Creates a fingerprint for `family` with no parameters.
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds (or replaces) a named parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Param>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// The request family, e.g. `"weather"`.
    pub fn family(&self) -> &str {
        &self.family
    }

    /// Looks up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Param> {
        self.params.get(name)
    }

    /// Iterates the parameters in name order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &Param)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.family)?;
        if self.params.is_empty() {
            return Ok(());
        }
        f.write_str("[")?;
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str("]")
    }
}

impl From<&str> for Fingerprint {
    fn from(family: &str) -> Self {
        Fingerprint::new(family)
    }
}
