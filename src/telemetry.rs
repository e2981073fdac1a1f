//! Telemetry channels and the per-unit calibration that turns raw ADC counts
//! into volts, amps and degrees Celsius.
//!
//! Every board is individually calibrated at the factory, so the tables are
//! keyed by hardware unit as well as by channel.

use crate::protocol::Error;
use std::str::FromStr;

/// Significant ADC bits of a telemetry reading.
pub const ADC_MASK: u16 = 0x07FF;

/// Boolean channels read as "true" below this count.
pub const BOOLEAN_THRESHOLD: u16 = 512;

/// How raw counts of one channel map to a physical value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Calibration {
    Linear { multiplier: f32, offset: f32 },
    Boolean,
}

impl Calibration {
    pub const fn linear(multiplier: f32, offset: f32) -> Self {
        Self::Linear { multiplier, offset }
    }

    /// Converts a raw reading, only the lower 11 bits are significant.
    pub fn convert(self, raw: u16) -> f32 {
        let counts = raw & ADC_MASK;
        match self {
            Self::Linear { multiplier, offset } => multiplier * f32::from(counts) + offset,
            Self::Boolean if counts < BOOLEAN_THRESHOLD => 1.0,
            Self::Boolean => 0.0,
        }
    }
}

macro_rules! channels {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident : $repr:ident {
            $($variant:ident = $value:expr => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr($repr)]
        $vis enum $name {
            $($variant = $value,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

channels! {
    /// EPS telemetry channel, the discriminant is the register address.
    pub enum EpsChannel: u16 {
        Vbcr1 = 0xE110 => "VBCR1",
        Ibcr1A = 0xE114 => "IBCR1A",
        Ibcr1B = 0xE115 => "IBCR1B",
        Tbcr1A = 0xE118 => "TBCR1A",
        Tbcr1B = 0xE119 => "TBCR1B",
        Vbcr2 = 0xE120 => "VBCR2",
        Ibcr2A = 0xE124 => "IBCR2A",
        Ibcr2B = 0xE125 => "IBCR2B",
        Tbcr2A = 0xE128 => "TBCR2A",
        Tbcr2B = 0xE129 => "TBCR2B",
        Vbcr3 = 0xE130 => "VBCR3",
        Ibcr3A = 0xE134 => "IBCR3A",
        Ibcr3B = 0xE135 => "IBCR3B",
        Tbcr3A = 0xE138 => "TBCR3A",
        Tbcr3B = 0xE139 => "TBCR3B",
        Vbcr4 = 0xE140 => "VBCR4",
        Ibcr4A = 0xE144 => "IBCR4A",
        Ibcr4B = 0xE145 => "IBCR4B",
        Tbcr4A = 0xE148 => "TBCR4A",
        Tbcr4B = 0xE149 => "TBCR4B",
        Vbcr5 = 0xE150 => "VBCR5",
        Ibcr5A = 0xE154 => "IBCR5A",
        Ibcr5B = 0xE155 => "IBCR5B",
        Tbcr5A = 0xE158 => "TBCR5A",
        Tbcr5B = 0xE159 => "TBCR5B",
        IidiodeOut = 0xE284 => "IIDIODE_OUT",
        VidiodeOut = 0xE280 => "VIDIODE_OUT",
        I3v3Drw = 0xE205 => "I3V3_DRW",
        I5vDrw = 0xE215 => "I5V_DRW",
        Ipcm12v = 0xE234 => "IPCM12V",
        Vpcm12v = 0xE230 => "VPCM12V",
        IpcmBatV = 0xE224 => "IPCMBATV",
        VpcmBatV = 0xE220 => "VPCMBATV",
        Ipcm5v = 0xE214 => "IPCM5V",
        Vpcm5v = 0xE210 => "VPCM5V",
        Ipcm3v3 = 0xE204 => "IPCM3V3",
        Vpcm3v3 = 0xE200 => "VPCM3V3",
        Vsw1 = 0xE410 => "VSW1",
        Isw1 = 0xE414 => "ISW1",
        Vsw2 = 0xE420 => "VSW2",
        Isw2 = 0xE424 => "ISW2",
        Vsw3 = 0xE430 => "VSW3",
        Isw3 = 0xE434 => "ISW3",
        Vsw4 = 0xE440 => "VSW4",
        Isw4 = 0xE444 => "ISW4",
        Vsw5 = 0xE450 => "VSW5",
        Isw5 = 0xE454 => "ISW5",
        Vsw6 = 0xE460 => "VSW6",
        Isw6 = 0xE464 => "ISW6",
        Vsw7 = 0xE470 => "VSW7",
        Isw7 = 0xE474 => "ISW7",
        Vsw8 = 0xE480 => "VSW8",
        Isw8 = 0xE484 => "ISW8",
        Vsw9 = 0xE490 => "VSW9",
        Isw9 = 0xE494 => "ISW9",
        Vsw10 = 0xE4A0 => "VSW10",
        Isw10 = 0xE4A4 => "ISW10",
        Tbrd = 0xE308 => "TBRD",
    }
}

impl EpsChannel {
    pub const fn register(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for EpsChannel {
    type Error = Error;

    fn try_from(register: u16) -> Result<Self, Self::Error> {
        Self::ALL
            .iter()
            .copied()
            .find(|channel| channel.register() == register)
            .ok_or(Error::UnknownChannel(register))
    }
}

/// Parses a channel name (`TBRD`, case insensitive) or a register address (`0xE308`).
impl FromStr for EpsChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(channel) = Self::ALL
            .iter()
            .copied()
            .find(|channel| channel.name().eq_ignore_ascii_case(s))
        {
            return Ok(channel);
        }
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| format!("Unknown EPS channel '{s}'"))?;
        let register =
            u16::from_str_radix(hex, 16).map_err(|e| format!("Invalid register '{s}': {e}"))?;
        Self::try_from(register).map_err(|e| e.to_string())
    }
}

channels! {
    /// Battery telemetry channel, the discriminant is the table index.
    pub enum BatChannel: u8 {
        Vbat = 0 => "VBAT",
        Ibat = 1 => "IBAT",
        IdirBat = 2 => "IDIRBAT",
        Tbrd = 3 => "TBRD",
        Ipcm5v = 4 => "IPCM5V",
        Vpcm5v = 5 => "VPCM5V",
        Ipcm3v3 = 6 => "IPCM3V3",
        Vpcm3v3 = 7 => "VPCM3V3",
        Tbat1 = 8 => "TBAT1",
        Hbat1 = 9 => "HBAT1",
        Tbat2 = 10 => "TBAT2",
        Hbat2 = 11 => "HBAT2",
        Tbat3 = 12 => "TBAT3",
        Hbat3 = 13 => "HBAT3",
        Tbat4 = 14 => "TBAT4",
        Hbat4 = 15 => "HBAT4",
    }
}

impl BatChannel {
    pub const fn index(self) -> u8 {
        self as u8
    }

    pub const fn register(self) -> u16 {
        match self {
            Self::Vbat => 0xE280,
            Self::Ibat => 0xE284,
            Self::IdirBat => 0xE28E,
            Self::Tbrd => 0xE308,
            Self::Ipcm5v => 0xE214,
            Self::Vpcm5v => 0xE210,
            Self::Ipcm3v3 => 0xE204,
            Self::Vpcm3v3 => 0xE200,
            Self::Tbat1 => 0xE398,
            Self::Hbat1 => 0xE39F,
            Self::Tbat2 => 0xE3A8,
            Self::Hbat2 => 0xE3AF,
            Self::Tbat3 => 0xE3B8,
            Self::Hbat3 => 0xE3BF,
            Self::Tbat4 => 0xE3C8,
            Self::Hbat4 => 0xE3CF,
        }
    }

    /// Current direction and heater state channels are thresholds, not levels.
    pub const fn is_boolean(self) -> bool {
        matches!(
            self,
            Self::IdirBat | Self::Hbat1 | Self::Hbat2 | Self::Hbat3 | Self::Hbat4
        )
    }
}

impl TryFrom<u8> for BatChannel {
    type Error = Error;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or(Error::BatChannelOutOfRange(index))
    }
}

impl FromStr for BatChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|channel| channel.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown battery channel '{s}'"))
    }
}

/// Calibrated EPS motherboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum EpsUnit {
    /// Serial number CS05495.
    #[default]
    Flight,
    /// Serial number CS05496.
    Test,
}

impl EpsUnit {
    pub const fn serial(self) -> &'static str {
        match self {
            Self::Flight => "CS05495",
            Self::Test => "CS05496",
        }
    }

    pub fn calibration(self, channel: EpsChannel) -> Calibration {
        let (flight, test) = eps_coefficients(channel);
        let (multiplier, offset) = match self {
            Self::Flight => flight,
            Self::Test => test,
        };
        Calibration::linear(multiplier, offset)
    }
}

impl FromStr for EpsUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flight" | "cs05495" => Ok(Self::Flight),
            "test" | "cs05496" => Ok(Self::Test),
            _ => Err(format!("Unknown EPS unit '{s}', expected 'flight' or 'test'")),
        }
    }
}

impl std::fmt::Display for EpsUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Flight => write!(f, "flight ({})", self.serial()),
            Self::Test => write!(f, "test ({})", self.serial()),
        }
    }
}

type Coefficients = (f32, f32);

/// (flight, test) multiplier and offset of every EPS channel.
fn eps_coefficients(channel: EpsChannel) -> (Coefficients, Coefficients) {
    use EpsChannel::*;
    const TBCR: Coefficients = (0.4963, -273.15);
    const IBCR_UNUSED: Coefficients = (0.0009775, 0.0);
    const VBCR_UNUSED: Coefficients = (0.0249, 0.0);
    const IDRW: Coefficients = (0.001327547, 0.0);
    match channel {
        Vbcr1 => ((0.0250, -0.054031764), (0.0250, -0.069905098)),
        Ibcr1A => ((0.9874, -4.174173455), (0.9785, 1.77603005)),
        Ibcr1B => ((0.9789, 7.008291672), (0.9807, 3.218265628)),
        Vbcr2 => ((0.0249, 0.017106143), (0.0242, 0.335439976)),
        Ibcr2A => ((0.9750, -3.503655217), (1.0419, -18.14088122)),
        Ibcr2B => ((0.9757, 7.049298113), (0.9384, 8.821566144)),
        Vbcr3 => ((0.0100, -0.002789656), (0.0099, 0.03745770)),
        Ibcr3A => ((0.9909, -3.835232987), (0.9805, -5.390965407)),
        Ibcr3B => ((0.9742, -3.524680552), (0.9761, -0.997164069)),
        // BCR4 and BCR5 are not populated, nominal factors only.
        Vbcr4 | Vbcr5 => (VBCR_UNUSED, VBCR_UNUSED),
        Ibcr4A | Ibcr4B | Ibcr5A | Ibcr5B => (IBCR_UNUSED, IBCR_UNUSED),
        Tbcr1A | Tbcr1B | Tbcr2A | Tbcr2B | Tbcr3A | Tbcr3B | Tbcr4A | Tbcr4B | Tbcr5A
        | Tbcr5B => (TBCR, TBCR),
        IidiodeOut => ((14.177, -6.257116521), (14.36982316, -18.81296305)),
        VidiodeOut => ((0.0090, 0.01881831), (0.009, 0.001666667)),
        I3v3Drw | I5vDrw => (IDRW, IDRW),
        Ipcm12v => ((2.06, 3.262117965), (2.06, -6.078449002)),
        Vpcm12v => ((0.005, 7.57), (0.009, 4.013)),
        IpcmBatV => ((5.284, -16.01660841), (5.297, -15.14973264)),
        VpcmBatV => ((0.009412, -0.378276679), (0.009535, -0.447889995)),
        Ipcm5v => ((5.250, -9.605679262), (5.268, 17.02871336)),
        Vpcm5v => ((0.007486, -1.398997817), (0.007205, -1.162948718)),
        Ipcm3v3 => ((5.291, -25.11133945), (5.247, -12.46619029)),
        Vpcm3v3 => ((0.005288627, -0.768041845), (0.00549, -0.923534014)),
        Vsw1 => ((0.015, -1.362), (0.0250, -10.242)),
        Isw1 => ((0.001328, 0.0), (0.0013, -7.744670749)),
        Vsw2 => ((0.01297, 0.454444444), (0.02296, -8.539259259)),
        Isw2 => ((0.001328, 0.0), (0.00133, -5.843992008)),
        Vsw3 => ((0.00723, -1.184866667), (0.00692, -0.917487603)),
        Isw3 => ((0.00138, 0.0), (0.00132, -3.690421648)),
        Vsw4 => ((0.00505, -0.59025), (0.005112, -0.624585313)),
        Isw4 => ((0.001328, 0.0), (0.001324, -0.146562849)),
        Vsw5 => ((0.00793, -1.808213115), (0.007441624, -1.369142132)),
        Isw5 => ((0.001328, 0.0), (0.001331833, -6.096487992)),
        Vsw6 => ((0.00713, -1.098266667), (0.007418782, -1.345142132)),
        Isw6 => ((0.001328, 0.0), (0.001335975, -7.937734278)),
        Vsw7 => ((0.007812, -1.685502538), (0.007928, -1.784819672)),
        Isw7 => ((0.001328, 0.0), (0.001344, -2.138472187)),
        Vsw8 => ((0.004881, -0.453816415), (0.005372, -0.831581448)),
        Isw8 => ((0.001328, 0.0), (0.001326, -1.586138893)),
        Vsw9 => ((0.005472, -0.90680663), (0.005501, -0.92850591)),
        Isw9 => ((0.001328, 0.0), (0.001337, -1.868780037)),
        Vsw10 => ((0.005082, -0.608583153), (0.006311, -1.55274344)),
        Isw10 => ((0.001328, 0.0), (0.001320, -4.740413691)),
        Tbrd => ((0.3721, -274.3), (0.3716, -273.4)),
    }
}

/// Calibrated battery board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum BatUnit {
    #[default]
    Cs05602,
    Cs05876,
}

impl BatUnit {
    pub const ALL: [BatUnit; 2] = [Self::Cs05602, Self::Cs05876];

    pub const fn serial(self) -> &'static str {
        match self {
            Self::Cs05602 => "CS05602",
            Self::Cs05876 => "CS05876",
        }
    }

    /// Bus address the unit is strapped to.
    pub const fn default_address(self) -> u8 {
        match self {
            Self::Cs05602 => 0x2D,
            Self::Cs05876 => 0x2A,
        }
    }

    pub fn calibration(self, channel: BatChannel) -> Calibration {
        if channel.is_boolean() {
            return Calibration::Boolean;
        }
        let table = match self {
            Self::Cs05602 => &BAT_CS05602,
            Self::Cs05876 => &BAT_CS05876,
        };
        let (multiplier, offset) = table[usize::from(channel.index())];
        Calibration::linear(multiplier, offset)
    }
}

impl FromStr for BatUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|unit| unit.serial().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown battery unit '{s}'"))
    }
}

impl std::fmt::Display for BatUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.serial())
    }
}

// Indexed by `BatChannel::index`, boolean channels carry zeros.
const BAT_CS05602: [Coefficients; 16] = [
    (0.01154113, -2.165166006),
    (14.12626972, -21.29715505),
    (0.0, 0.0),
    (0.373270499, -274.3071741),
    (1.326049, -4.971009049),
    (0.005875, -0.019700461),
    (1.332333, -4.006814185),
    (0.004378, -0.062901554),
    (0.356420, -211.8428277),
    (0.0, 0.0),
    (0.358785, -213.8201893),
    (0.0, 0.0),
    (0.357263, -212.2530611),
    (0.0, 0.0),
    (0.359659, -214.94825),
    (0.0, 0.0),
];

const BAT_CS05876: [Coefficients; 16] = [
    (0.013799092, -4.077361669),
    (14.2197363, -22.09711562),
    (0.0, 0.0),
    (0.376119835, -276.5698132),
    (1.325265973, -0.77177011),
    (0.00625, -0.33125),
    (1.317095431, 3.117553712),
    (0.003893443, 0.324672131),
    (0.378749772, -227.1297211),
    (0.0, 0.0),
    (0.375908852, -225.6774861),
    (0.0, 0.0),
    (0.379299669, -227.9787862),
    (0.0, 0.0),
    (0.375748837, -224.3624786),
    (0.0, 0.0),
];

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashSet;

    fn approx(actual: f32, expected: f32) -> bool {
        (actual - expected).abs() < 1e-3
    }

    #[test]
    fn board_temperature_flight_unit() {
        let value = EpsUnit::Flight
            .calibration(EpsChannel::Tbrd)
            .convert(0x0313);
        assert!(approx(value, 0.3721 * 787.0 - 274.3), "{value}");
        assert!((value - 18.56).abs() < 0.05, "{value}");
    }

    #[test]
    fn upper_bits_are_ignored() {
        let calibration = EpsUnit::Test.calibration(EpsChannel::Vsw4);
        assert_eq!(calibration.convert(0xF313), calibration.convert(0x0313));
    }

    #[test]
    fn units_differ() {
        let flight = EpsUnit::Flight.calibration(EpsChannel::Ibcr2A).convert(1000);
        let test = EpsUnit::Test.calibration(EpsChannel::Ibcr2A).convert(1000);
        assert!(approx(flight, 0.9750 * 1000.0 - 3.503655217));
        assert!(approx(test, 1.0419 * 1000.0 - 18.14088122));
    }

    #[test]
    fn eps_channel_table() {
        assert_eq!(EpsChannel::ALL.len(), 58);
        let registers: HashSet<u16> = EpsChannel::ALL.iter().map(|c| c.register()).collect();
        assert_eq!(registers.len(), 58);
        assert_eq!(EpsChannel::Isw10.register(), 0xE4A4);
        assert_matches!(EpsChannel::try_from(0xE308), Ok(EpsChannel::Tbrd));
        assert_matches!(EpsChannel::try_from(0x1234), Err(Error::UnknownChannel(0x1234)));
    }

    #[test]
    fn eps_channel_parse() {
        assert_matches!("tbrd".parse::<EpsChannel>(), Ok(EpsChannel::Tbrd));
        assert_matches!("VIDIODE_OUT".parse::<EpsChannel>(), Ok(EpsChannel::VidiodeOut));
        assert_matches!("0xE4A0".parse::<EpsChannel>(), Ok(EpsChannel::Vsw10));
        assert!("0xE4A1".parse::<EpsChannel>().is_err());
        assert!("VBAT".parse::<EpsChannel>().is_err());
    }

    #[test]
    fn bat_channel_table() {
        assert_eq!(BatChannel::ALL.len(), 16);
        for (index, channel) in BatChannel::ALL.iter().enumerate() {
            assert_eq!(usize::from(channel.index()), index);
        }
        assert_eq!(BatChannel::Hbat4.register(), 0xE3CF);
        assert_matches!(BatChannel::try_from(15), Ok(BatChannel::Hbat4));
        assert_matches!(BatChannel::try_from(16), Err(Error::BatChannelOutOfRange(16)));
        assert_matches!("tbat3".parse::<BatChannel>(), Ok(BatChannel::Tbat3));
    }

    #[test]
    fn boolean_channels() {
        let calibration = BatUnit::Cs05876.calibration(BatChannel::Hbat2);
        assert_eq!(calibration, Calibration::Boolean);
        assert_eq!(calibration.convert(511), 1.0);
        assert_eq!(calibration.convert(512), 0.0);
        assert_eq!(calibration.convert(0xF800), 1.0);
        assert_eq!(
            BatChannel::ALL.iter().filter(|c| c.is_boolean()).count(),
            5
        );
    }

    #[test]
    fn battery_units() {
        let value = BatUnit::Cs05602.calibration(BatChannel::Vbat).convert(1500);
        assert!(approx(value, 0.01154113 * 1500.0 - 2.165166006));
        let value = BatUnit::Cs05876.calibration(BatChannel::Tbat4).convert(800);
        assert!(approx(value, 0.375748837 * 800.0 - 224.3624786));
        assert_eq!(BatUnit::Cs05602.default_address(), 0x2D);
        assert_eq!(BatUnit::Cs05876.default_address(), 0x2A);
        assert_matches!("cs05876".parse::<BatUnit>(), Ok(BatUnit::Cs05876));
    }
}
