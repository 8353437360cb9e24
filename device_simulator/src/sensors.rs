use common::physical::Percentage;
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Source of the values the simulated controller reports.
pub trait SensorSource: Send {
    fn gas_present(&mut self) -> bool;
    fn water_level(&mut self) -> Percentage;
    fn motion_present(&mut self) -> bool;
}

/// Always reports the same values. Used by tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedSensors {
    pub gas: bool,
    pub water: Percentage,
    pub motion: bool,
}

impl SensorSource for FixedSensors {
    fn gas_present(&mut self) -> bool {
        self.gas
    }

    fn water_level(&mut self) -> Percentage {
        self.water
    }

    fn motion_present(&mut self) -> bool {
        self.motion
    }
}

/// Chance per reading that the gas sensor flips.
const GAS_FLIP_PROBABILITY: f64 = 0.05;

/// Chance per reading that motion is seen.
const MOTION_PROBABILITY: f64 = 0.2;

/// Largest step of the water level between two readings.
const WATER_STEP: i16 = 3;

/// Values that wander a little on every reading, like a real rig left alone.
#[derive(Debug)]
pub struct DriftingSensors {
    rng: StdRng,
    gas: bool,
    water: Percentage,
}

impl DriftingSensors {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic sequence for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            gas: false,
            water: Percentage::saturating(50),
        }
    }
}

impl Default for DriftingSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorSource for DriftingSensors {
    fn gas_present(&mut self) -> bool {
        if self.rng.gen_bool(GAS_FLIP_PROBABILITY) {
            self.gas = !self.gas;
        }
        self.gas
    }

    fn water_level(&mut self) -> Percentage {
        let step = self.rng.gen_range(-WATER_STEP..=WATER_STEP);
        let level = (i16::from(self.water.value()) + step).clamp(0, 100);
        self.water = Percentage::saturating(level as u8);
        self.water
    }

    fn motion_present(&mut self) -> bool {
        self.rng.gen_bool(MOTION_PROBABILITY)
    }
}
