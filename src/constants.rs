//! Physical constants used throughout the flux calculation.
//!
//! These are fixed at build time. `PhysicalConstants::STANDARD` groups them for callers which
//! prefer to pass a single value around.

/// Zero Celsius in Kelvin
pub const T_0: f64 = 273.15;

/// Standard atmospheric pressure in Pa
pub const ATM: f64 = 101_325.0;

/// Molar gas constant in J mol^-1 K^-1
pub const R_GAS: f64 = 8.314_459_8;

/// Air concentration at STP in mol m^-3
pub const AIR_CONC_STP: f64 = ATM / (R_GAS * T_0);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhysicalConstants {
    pub t_0: f64,
    pub atm: f64,
    pub r_gas: f64,
    pub air_conc_stp: f64,
}

impl PhysicalConstants {
    pub const STANDARD: Self = Self {
        t_0: T_0,
        atm: ATM,
        r_gas: R_GAS,
        air_conc_stp: AIR_CONC_STP,
    };
}
