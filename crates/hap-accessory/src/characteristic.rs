//! HAP characteristics: typed, permissioned attributes.
//!
//! A characteristic is the smallest unit exposed to a controller, e.g. a
//! temperature reading or an on/off state. Values are JSON values typed by
//! the characteristic format and constrained by the optional metadata
//! (min/max/step, valid values, string length).

use hap_core::error::{Error, ParseError, Result};
use hap_core::{HapStatus, HapType};
use serde_json::{json, Map, Value};

/// Wire formats a characteristic value can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Bool,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Int32,
    Float,
    String,
    Tlv8,
    Data,
}

impl Format {
    /// Wire name used in HAP JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Int32 => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Tlv8 => "tlv8",
            Self::Data => "data",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, ParseError> {
        match s {
            "bool" => Ok(Self::Bool),
            "uint8" => Ok(Self::UInt8),
            "uint16" => Ok(Self::UInt16),
            "uint32" => Ok(Self::UInt32),
            "uint64" => Ok(Self::UInt64),
            "int" | "int32" => Ok(Self::Int32),
            "float" => Ok(Self::Float),
            "string" => Ok(Self::String),
            "tlv8" => Ok(Self::Tlv8),
            "data" => Ok(Self::Data),
            other => Err(ParseError::InvalidValue(format!(
                "unknown characteristic format {other:?}"
            ))),
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            Self::UInt8
                | Self::UInt16
                | Self::UInt32
                | Self::UInt64
                | Self::Int32
                | Self::Float
        )
    }

    pub fn is_integer(self) -> bool {
        self.is_numeric() && self != Self::Float
    }

    /// Intrinsic numeric range of the format itself.
    fn intrinsic_range(self) -> Option<(f64, f64)> {
        match self {
            Self::UInt8 => Some((0.0, u8::MAX as f64)),
            Self::UInt16 => Some((0.0, u16::MAX as f64)),
            Self::UInt32 => Some((0.0, u32::MAX as f64)),
            Self::UInt64 => Some((0.0, u64::MAX as f64)),
            Self::Int32 => Some((i32::MIN as f64, i32::MAX as f64)),
            Self::Float => None,
            _ => None,
        }
    }
}

/// Units attached to numeric characteristics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Celsius,
    Percentage,
    ArcDegrees,
    Lux,
    Seconds,
}

impl Unit {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Celsius => "celsius",
            Self::Percentage => "percentage",
            Self::ArcDegrees => "arcdegrees",
            Self::Lux => "lux",
            Self::Seconds => "seconds",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, ParseError> {
        match s {
            "celsius" => Ok(Self::Celsius),
            "percentage" => Ok(Self::Percentage),
            "arcdegrees" => Ok(Self::ArcDegrees),
            "lux" => Ok(Self::Lux),
            "seconds" => Ok(Self::Seconds),
            other => Err(ParseError::InvalidValue(format!("unknown unit {other:?}"))),
        }
    }
}

/// Permissions a characteristic can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perm {
    PairRead,
    PairWrite,
    Notify,
    Hidden,
    AdditionalAuthorization,
    TimedWrite,
    WriteResponse,
}

impl Perm {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PairRead => "pr",
            Self::PairWrite => "pw",
            Self::Notify => "ev",
            Self::Hidden => "hd",
            Self::AdditionalAuthorization => "aa",
            Self::TimedWrite => "tw",
            Self::WriteResponse => "wr",
        }
    }

    pub fn parse(s: &str) -> std::result::Result<Self, ParseError> {
        match s {
            "pr" => Ok(Self::PairRead),
            "pw" => Ok(Self::PairWrite),
            "ev" => Ok(Self::Notify),
            "hd" => Ok(Self::Hidden),
            "aa" => Ok(Self::AdditionalAuthorization),
            "tw" => Ok(Self::TimedWrite),
            "wr" => Ok(Self::WriteResponse),
            other => Err(ParseError::InvalidValue(format!(
                "unknown permission {other:?}"
            ))),
        }
    }
}

/// How a value assignment treats constraint violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionMode {
    /// Server-originated updates: out-of-range numerics are clamped,
    /// overlong strings truncated.
    Clamp,
    /// Controller-originated writes: out-of-range numerics and overlong
    /// strings are rejected with a per-characteristic status.
    Reject,
}

/// Property overrides applied by `configure_char`.
#[derive(Debug, Clone, Default)]
pub struct PropertyOverrides {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_step: Option<f64>,
    pub max_len: Option<u64>,
    pub unit: Option<Unit>,
    pub valid_values: Option<Vec<i64>>,
    pub valid_values_range: Option<[i64; 2]>,
}

/// A single typed attribute.
#[derive(Debug, Clone)]
pub struct Characteristic {
    display_name: String,
    type_id: HapType,
    format: Format,
    perms: Vec<Perm>,
    unit: Option<Unit>,
    min_value: Option<f64>,
    max_value: Option<f64>,
    min_step: Option<f64>,
    max_len: Option<u64>,
    max_data_len: Option<u64>,
    valid_values: Option<Vec<i64>>,
    valid_values_range: Option<[i64; 2]>,
    value: Option<Value>,
    iid: u64,
}

impl Characteristic {
    pub fn new(
        display_name: impl Into<String>,
        type_id: HapType,
        format: Format,
        perms: Vec<Perm>,
    ) -> Self {
        let mut char = Self {
            display_name: display_name.into(),
            type_id,
            format,
            perms,
            unit: None,
            min_value: None,
            max_value: None,
            min_step: None,
            max_len: None,
            max_data_len: None,
            valid_values: None,
            valid_values_range: None,
            value: None,
            iid: 0,
        };
        if char.has_perm(Perm::PairRead) {
            char.value = Some(char.default_value());
        }
        char
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn type_id(&self) -> HapType {
        self.type_id
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn perms(&self) -> &[Perm] {
        &self.perms
    }

    pub fn has_perm(&self, perm: Perm) -> bool {
        self.perms.contains(&perm)
    }

    pub fn iid(&self) -> u64 {
        self.iid
    }

    pub(crate) fn set_iid(&mut self, iid: u64) {
        self.iid = iid;
    }

    /// Current value; `None` for write-only characteristics.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn unit(&self) -> Option<Unit> {
        self.unit
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit.into();
    }

    pub fn set_constraints(
        &mut self,
        min_value: Option<f64>,
        max_value: Option<f64>,
        min_step: Option<f64>,
    ) {
        self.min_value = min_value;
        self.max_value = max_value;
        self.min_step = min_step;
    }

    pub fn set_max_len(&mut self, max_len: u64) {
        self.max_len = Some(max_len);
    }

    pub fn set_max_data_len(&mut self, max_data_len: u64) {
        self.max_data_len = Some(max_data_len);
    }

    pub fn set_valid_values(&mut self, valid_values: Vec<i64>) {
        self.valid_values = Some(valid_values);
    }

    pub fn set_valid_values_range(&mut self, range: [i64; 2]) {
        self.valid_values_range = Some(range);
    }

    /// Apply catalog or caller overrides in one shot.
    pub fn override_properties(&mut self, overrides: &PropertyOverrides) {
        if overrides.min_value.is_some() {
            self.min_value = overrides.min_value;
        }
        if overrides.max_value.is_some() {
            self.max_value = overrides.max_value;
        }
        if overrides.min_step.is_some() {
            self.min_step = overrides.min_step;
        }
        if overrides.max_len.is_some() {
            self.max_len = overrides.max_len;
        }
        if overrides.unit.is_some() {
            self.unit = overrides.unit;
        }
        if let Some(vv) = &overrides.valid_values {
            self.valid_values = Some(vv.clone());
        }
        if let Some(range) = overrides.valid_values_range {
            self.valid_values_range = Some(range);
        }
    }

    /// Default value for this characteristic's format.
    ///
    /// A valid-values set wins over the per-format default so enum
    /// characteristics start on a member of the set.
    pub fn default_value(&self) -> Value {
        if let Some(valid) = &self.valid_values {
            if let Some(min) = valid.iter().min() {
                return json!(min);
            }
        }
        match self.format {
            Format::Bool => json!(false),
            Format::Float => {
                let v = self.min_value.unwrap_or(0.0);
                json!(v)
            }
            f if f.is_integer() => {
                let v = self.min_value.unwrap_or(0.0) as i64;
                json!(v)
            }
            _ => json!(""),
        }
    }

    /// Assign a value, applying the coercion rules for the given mode.
    ///
    /// Returns the committed value. Controller-originated assignments
    /// reject constraint violations instead of clamping.
    pub fn coerce(&self, value: &Value, mode: CoercionMode) -> std::result::Result<Value, HapStatus> {
        match self.format {
            Format::Bool => coerce_bool(value),
            Format::Float => self.coerce_number(value, mode, false),
            f if f.is_integer() => self.coerce_number(value, mode, true),
            Format::String => self.coerce_string(value, mode),
            Format::Tlv8 | Format::Data => self.coerce_data(value, mode),
            _ => unreachable!("all formats covered"),
        }
    }

    /// Store a coerced value. Callers are expected to have run `coerce`.
    pub fn commit(&mut self, value: Value) {
        self.value = Some(value);
    }

    /// Server-originated assignment: coerce with clamping and store.
    pub fn set_value(&mut self, value: &Value) -> Result<Value> {
        let coerced = self
            .coerce(value, CoercionMode::Clamp)
            .map_err(|status| {
                Error::Accessory(format!(
                    "invalid value {value} for characteristic {} ({:?})",
                    self.display_name, status
                ))
            })?;
        self.value = Some(coerced.clone());
        Ok(coerced)
    }

    fn coerce_number(
        &self,
        value: &Value,
        mode: CoercionMode,
        integer: bool,
    ) -> std::result::Result<Value, HapStatus> {
        let mut number = match value {
            Value::Number(n) => n.as_f64().ok_or(HapStatus::InvalidValue)?,
            Value::Bool(b) => u8::from(*b) as f64,
            _ => return Err(HapStatus::InvalidValue),
        };

        // Floats written to integer formats truncate toward zero.
        if integer {
            number = number.trunc();
        }

        let (mut lo, mut hi) = self
            .format
            .intrinsic_range()
            .unwrap_or((f64::NEG_INFINITY, f64::INFINITY));
        if let Some(min) = self.min_value {
            lo = lo.max(min);
        }
        if let Some(max) = self.max_value {
            hi = hi.min(max);
        }

        if number < lo || number > hi {
            match mode {
                CoercionMode::Reject => return Err(HapStatus::InvalidValue),
                CoercionMode::Clamp => number = number.clamp(lo, hi),
            }
        }

        if let Some(step) = self.min_step {
            if step > 0.0 {
                let base = self.min_value.unwrap_or(0.0);
                number = base + ((number - base) / step).round() * step;
                // Scrub accumulated floating point noise so 5.0 stays 5.0
                // instead of 5.000000000000001.
                number = (number * 1e10).round() / 1e10;
                number = number.clamp(lo, hi);
            }
        }

        if let Some(valid) = &self.valid_values {
            let as_int = number as i64;
            if number.fract() != 0.0 || !valid.contains(&as_int) {
                return Err(HapStatus::InvalidValue);
            }
            return Ok(json!(as_int));
        }

        if let Some([lo, hi]) = self.valid_values_range {
            let as_int = number as i64;
            if as_int < lo || as_int > hi {
                return Err(HapStatus::InvalidValue);
            }
        }

        if integer {
            Ok(json!(number as i64))
        } else {
            Ok(json!(number))
        }
    }

    fn coerce_string(
        &self,
        value: &Value,
        mode: CoercionMode,
    ) -> std::result::Result<Value, HapStatus> {
        let s = value.as_str().ok_or(HapStatus::InvalidValue)?;
        let max = self.max_len.unwrap_or(DEFAULT_MAX_LEN) as usize;
        if s.chars().count() > max {
            return match mode {
                CoercionMode::Reject => Err(HapStatus::InvalidValue),
                CoercionMode::Clamp => {
                    let truncated: String = s.chars().take(max).collect();
                    Ok(json!(truncated))
                }
            };
        }
        Ok(json!(s))
    }

    fn coerce_data(
        &self,
        value: &Value,
        _mode: CoercionMode,
    ) -> std::result::Result<Value, HapStatus> {
        let s = value.as_str().ok_or(HapStatus::InvalidValue)?;
        if let Some(max) = self.max_data_len {
            if s.len() as u64 > max {
                return Err(HapStatus::InvalidValue);
            }
        }
        Ok(json!(s))
    }

    /// HAP JSON representation for `/accessories` and `/characteristics`.
    pub fn to_hap(&self) -> Map<String, Value> {
        let mut rep = Map::new();
        rep.insert("iid".to_string(), json!(self.iid));
        rep.insert("type".to_string(), json!(self.type_id.to_wire()));
        rep.insert("description".to_string(), json!(self.display_name));
        rep.insert(
            "perms".to_string(),
            json!(self.perms.iter().map(|p| p.as_str()).collect::<Vec<_>>()),
        );
        rep.insert("format".to_string(), json!(self.format.as_str()));

        if self.format.is_numeric() {
            if let Some(unit) = self.unit {
                rep.insert("unit".to_string(), json!(unit.as_str()));
            }
            if let Some(min) = self.min_value {
                rep.insert("minValue".to_string(), number_value(min, self.format));
            }
            if let Some(max) = self.max_value {
                rep.insert("maxValue".to_string(), number_value(max, self.format));
            }
            if let Some(step) = self.min_step {
                rep.insert("minStep".to_string(), json!(step));
            }
            if let Some(valid) = &self.valid_values {
                rep.insert("valid-values".to_string(), json!(valid));
            }
            if let Some(range) = self.valid_values_range {
                rep.insert("valid-values-range".to_string(), json!(range));
            }
        }
        if self.format == Format::String {
            if let Some(max_len) = self.max_len {
                rep.insert("maxLen".to_string(), json!(max_len));
            }
        }
        if matches!(self.format, Format::Tlv8 | Format::Data) {
            if let Some(max) = self.max_data_len {
                rep.insert("maxDataLen".to_string(), json!(max));
            }
        }
        if self.has_perm(Perm::PairRead) {
            rep.insert(
                "value".to_string(),
                self.value.clone().unwrap_or(Value::Null),
            );
        }
        rep
    }
}

/// Default maximum string length when the catalog does not set one.
const DEFAULT_MAX_LEN: u64 = 64;

fn coerce_bool(value: &Value) -> std::result::Result<Value, HapStatus> {
    match value {
        Value::Bool(b) => Ok(json!(b)),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Ok(json!(false)),
            Some(1) => Ok(json!(true)),
            _ => Err(HapStatus::InvalidValue),
        },
        _ => Err(HapStatus::InvalidValue),
    }
}

/// Integer formats serialize constraint bounds as integers.
fn number_value(n: f64, format: Format) -> Value {
    if format.is_integer() {
        json!(n as i64)
    } else {
        json!(n)
    }
}
