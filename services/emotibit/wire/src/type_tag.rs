//! Two-character packet type codes and payload labels.

use crate::error::WireError;
use crate::header::PAYLOAD_DELIMITER;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Two ASCII characters identifying the kind of a packet.
///
/// Known codes have associated constants. Any other pair of ASCII characters is
/// carried through opaquely, which is how unrecognised sensor streams travel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag([u8; 2]);

macro_rules! type_tags {
    ($($(#[$doc:meta])* $name:ident = $code:literal;)*) => {
        impl TypeTag {
            $(
                $(#[$doc])*
                pub const $name: TypeTag = TypeTag(*$code);
            )*

            /// Human readable name for a known code
            pub fn name(&self) -> Option<&'static str> {
                match &self.0 {
                    $($code => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

type_tags! {
    // Sensor streams
    /// Electrodermal activity
    EDA = b"EA";
    /// Electrodermal level
    EDL = b"EL";
    /// Electrodermal response
    EDR = b"ER";
    /// PPG infrared channel
    PPG_INFRARED = b"PI";
    /// PPG red channel
    PPG_RED = b"PR";
    /// PPG green channel
    PPG_GREEN = b"PG";
    /// Blood oxygen saturation
    SPO2 = b"O2";
    /// Temperature sensor 0
    TEMPERATURE_0 = b"T0";
    /// Temperature sensor 1
    TEMPERATURE_1 = b"T1";
    /// Thermopile
    THERMOPILE = b"TH";
    /// Humidity sensor 0
    HUMIDITY_0 = b"H0";
    /// Accelerometer X axis
    ACCELEROMETER_X = b"AX";
    /// Accelerometer Y axis
    ACCELEROMETER_Y = b"AY";
    /// Accelerometer Z axis
    ACCELEROMETER_Z = b"AZ";
    /// Gyroscope X axis
    GYROSCOPE_X = b"GX";
    /// Gyroscope Y axis
    GYROSCOPE_Y = b"GY";
    /// Gyroscope Z axis
    GYROSCOPE_Z = b"GZ";
    /// Magnetometer X axis
    MAGNETOMETER_X = b"MX";
    /// Magnetometer Y axis
    MAGNETOMETER_Y = b"MY";
    /// Magnetometer Z axis
    MAGNETOMETER_Z = b"MZ";
    /// Battery voltage
    BATTERY_VOLTAGE = b"BV";
    /// Battery percentage
    BATTERY_PERCENT = b"B%";
    /// Short button press
    BUTTON_PRESS_SHORT = b"BS";
    /// Long button press
    BUTTON_PRESS_LONG = b"BL";
    /// Data clipping event
    DATA_CLIPPING = b"DC";
    /// Data overflow event
    DATA_OVERFLOW = b"DO";
    /// SD card fill percentage
    SD_CARD_PERCENT = b"SD";
    /// Heart rate
    HEART_RATE = b"HR";
    /// Inter-beat interval
    INTER_BEAT_INTERVAL = b"BI";
    /// Skin conductance response amplitude
    SKIN_CONDUCTANCE_RESPONSE_AMPLITUDE = b"SA";
    /// Skin conductance response frequency
    SKIN_CONDUCTANCE_RESPONSE_FREQ = b"SF";
    /// Skin conductance response rise time
    SKIN_CONDUCTANCE_RESPONSE_RISE_TIME = b"SR";
    /// GPS latitude and longitude
    GPS_LATLNG = b"GL";
    /// GPS speed
    GPS_SPEED = b"GS";
    /// GPS bearing
    GPS_BEARING = b"GB";
    /// GPS altitude
    GPS_ALTITUDE = b"GA";

    // Device and host control
    /// Device reset notice
    RESET = b"RS";
    /// Device debug text
    EMOTIBIT_DEBUG = b"DB";
    /// Acknowledgement
    ACK = b"AK";
    /// Negative acknowledgement
    NACK = b"NK";
    /// Device asks the host for data elements
    REQUEST_DATA = b"RD";
    /// Device clock timestamp
    TIMESTAMP_EMOTIBIT = b"TE";
    /// Host local wall clock timestamp
    TIMESTAMP_LOCAL = b"TL";
    /// Host UTC timestamp
    TIMESTAMP_UTC = b"TU";
    /// Cross-clock timestamp
    TIMESTAMP_CROSS_TIME = b"TX";
    /// Device mode
    EMOTIBIT_MODE = b"EM";
    /// Device information
    EMOTIBIT_INFO = b"EI";
    /// Free text note
    USER_NOTE = b"UN";
    /// LSL marker
    LSL_MARKER = b"LM";
    /// Recording started
    RECORD_BEGIN = b"RB";
    /// Recording stopped
    RECORD_END = b"RE";
    /// Normal power mode
    MODE_NORMAL_POWER = b"MN";
    /// Low power mode
    MODE_LOW_POWER = b"ML";
    /// Maximum low power mode
    MODE_MAX_LOW_POWER = b"MM";
    /// Wireless off mode
    MODE_WIRELESS_OFF = b"MO";
    /// Hibernate
    MODE_HIBERNATE = b"MH";
    /// Serial data on
    SERIAL_DATA_ON = b"S+";
    /// Serial data off
    SERIAL_DATA_OFF = b"S-";
    /// Add a Wi-Fi credential
    WIFI_ADD = b"WA";
    /// Delete a Wi-Fi credential
    WIFI_DELETE = b"WD";
    /// List request
    LIST = b"LS";

    // Advertising and connection
    /// Host call for devices to announce themselves
    HELLO_EMOTIBIT = b"HE";
    /// Device answer to HELLO_EMOTIBIT
    HELLO_HOST = b"HH";
    /// Host keepalive
    PING = b"PN";
    /// Device keepalive answer
    PONG = b"PO";
    /// Host asks a device to stream to it
    EMOTIBIT_CONNECT = b"EC";
    /// Host ends a connection
    EMOTIBIT_DISCONNECT = b"ED";
}

impl TypeTag {
    /// Build a tag from two printable ASCII bytes other than the field delimiter
    pub fn new(code: [u8; 2]) -> Result<Self, WireError> {
        if code.iter().all(|b| Self::is_code_byte(*b)) {
            Ok(Self(code))
        } else {
            Err(WireError::TypeTag(String::from_utf8_lossy(&code).into_owned()))
        }
    }

    /// Whether `b` may appear in a tag
    pub fn is_code_byte(b: u8) -> bool {
        b.is_ascii() && !b.is_ascii_control() && b != PAYLOAD_DELIMITER as u8
    }

    /// Take the tag from the first two characters of a header field.
    ///
    /// Characters past the second are ignored.
    pub fn from_field(field: &str) -> Result<Self, WireError> {
        match field.as_bytes() {
            [a, b, ..] => Self::new([*a, *b]),
            _ => Err(WireError::TypeTag(field.to_string())),
        }
    }

    /// The raw code bytes
    pub fn as_bytes(&self) -> &[u8; 2] {
        &self.0
    }

    /// The code as text
    pub fn as_str(&self) -> &str {
        // constructors only admit printable ASCII
        std::str::from_utf8(&self.0).unwrap_or("??")
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "TypeTag({} {})", self.as_str(), name),
            None => write!(f, "TypeTag({})", self.as_str()),
        }
    }
}

impl FromStr for TypeTag {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 2 {
            return Err(WireError::TypeTag(s.to_string()));
        }
        Self::from_field(s)
    }
}

impl Serialize for TypeTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TypeTag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Keys used in key/value payloads
pub mod label {
    /// Host control port
    pub const CONTROL_PORT: &str = "CP";
    /// Host data port, or the device availability sentinel in HELLO_HOST
    pub const DATA_PORT: &str = "DP";
    /// Device identifier
    pub const DEVICE_ID: &str = "DI";
    /// Recording status
    pub const RECORDING_STATUS: &str = "RS";
    /// Power status
    pub const POWER_STATUS: &str = "PS";
}

/// DATA_PORT value a device advertises while no host holds it
pub const EMOTIBIT_AVAILABLE: i32 = -1;
