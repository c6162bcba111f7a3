use std::{fmt, str::FromStr};

/// Número de bandas del ecualizador del nodo de audio
pub const BAND_COUNT: usize = 15;

/// Equalizer profiles a session can switch between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqProfile {
    #[default]
    Flat,
    /// Punchy bass and crisp mid-high tones.
    Boost,
    /// Metal/rock. Expect clipping on bassy songs.
    Metal,
    /// Piano and female vocals; also works as a bass cutoff.
    Piano,
}

impl EqProfile {
    pub const ALL: [EqProfile; 4] = [
        EqProfile::Flat,
        EqProfile::Boost,
        EqProfile::Metal,
        EqProfile::Piano,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EqProfile::Flat => "flat",
            EqProfile::Boost => "boost",
            EqProfile::Metal => "metal",
            EqProfile::Piano => "piano",
        }
    }

    /// Gain per band, -0.25 (muted) to 1.0 (doubled), 0.0 is unchanged.
    pub fn gains(self) -> [f32; BAND_COUNT] {
        match self {
            EqProfile::Flat => [0.0; BAND_COUNT],
            EqProfile::Boost => [
                -0.075, 0.125, 0.125, 0.1, 0.1, 0.05, 0.075, 0.0, 0.0, 0.0, 0.0, 0.0, 0.125, 0.15,
                0.05,
            ],
            EqProfile::Metal => [
                0.0, 0.1, 0.1, 0.15, 0.13, 0.1, 0.0, 0.125, 0.175, 0.175, 0.125, 0.125, 0.1, 0.075,
                0.0,
            ],
            EqProfile::Piano => [
                -0.25, -0.25, -0.125, 0.0, 0.25, 0.25, 0.0, -0.25, -0.25, 0.0, 0.0, 0.5, 0.25,
                -0.025, 0.0,
            ],
        }
    }

    /// Lista todos los perfiles disponibles
    pub fn list() -> String {
        Self::ALL
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl fmt::Display for EqProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Ecualizador inválido. Disponibles:\n\n{}", EqProfile::list())]
pub struct UnknownProfile;

impl FromStr for EqProfile {
    type Err = UnknownProfile;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == name)
            .ok_or(UnknownProfile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("Metal".parse(), Ok(EqProfile::Metal));
        assert_eq!(" piano ".parse(), Ok(EqProfile::Piano));
        assert_eq!("jazz".parse::<EqProfile>(), Err(UnknownProfile));
    }

    #[test]
    fn gains_stay_in_range() {
        for profile in EqProfile::ALL {
            assert!(profile
                .gains()
                .iter()
                .all(|g| (-0.25..=1.0).contains(g)));
        }
    }
}
