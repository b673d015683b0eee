use serde::{Deserialize, Serialize};

/// What a catalogue lookup knows about a title.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TitleInfo {
    pub name: String,
    pub score: Option<f32>,
    /// Total running time in minutes.
    pub duration: Option<i64>,
    pub num_of_episodes: Option<i64>,
    pub difficulty: Option<i64>,
}

/// Source of title metadata, keyed by url.
///
/// The engine never talks to external catalogues itself. Callers hand in
/// an implementation when adding or refreshing titles and the engine
/// stores whatever it returns; `None` means the url is not recognised.
pub trait MetadataProvider {
    fn lookup(&self, url: &str) -> Option<TitleInfo>;
}

/// Reference running time a title is measured against when scoring
/// difficulty.
#[derive(Clone, Copy, Debug)]
pub enum TimeScale {
    /// A 26 episode season at 22 minutes per episode.
    Series,
    /// A three hour film.
    Film,
}

impl TimeScale {
    fn max_minutes(self) -> f64 {
        match self {
            TimeScale::Series => 26.0 * 22.0,
            TimeScale::Film => 60.0 * 3.0,
        }
    }
}

/// Watch difficulty of a title given its public rating (0 to 10) and total
/// running time. Roughly 0 to 100, but a long, badly rated title can
/// exceed 100.
pub fn difficulty(score: f64, minutes: i64, scale: TimeScale) -> i64 {
    let hardness = ((13.0 - score).min(9.0) - 3.0) / 6.0;
    let time = minutes as f64 / scale.max_minutes();
    ((0.5 * (hardness + time) + 0.25 * hardness * time) * 100.0) as i64
}

#[cfg(test)]
mod test {
    use super::{TimeScale, difficulty};

    #[test]
    fn test_difficulty() {
        // A well rated three hour film sits in the middle of the scale.
        assert_eq!(difficulty(8.0, 180, TimeScale::Film), 75);
        // Short and loved is easy.
        assert!(difficulty(9.0, 30, TimeScale::Film) < 30);
        // Long and hated is brutal.
        assert!(difficulty(2.0, 1144, TimeScale::Series) > 100);
    }
}
