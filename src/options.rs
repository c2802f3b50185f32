//! Tunable parameters for a single [`crate::register`] call.

use serde::Deserialize;

/// Parameters controlling correspondence filtering and the GNC-annealed pose
/// solver. Deserializable so a caller can load a profile from YAML/JSON/TOML
/// the way the rest of the workspace loads node configuration.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Options {
    /// Multiplier (`> 1`) the annealed kernel scale is divided by every 4
    /// iterations while it remains above `maximum_correspondence_distance`.
    pub division_factor: f64,

    /// Skip the global rescale in normalization; the solver's annealed scale
    /// then starts at the data's own max radius instead of `1.0`.
    pub use_absolute_scale: bool,

    /// Enable the graduated non-convexity annealing schedule. If `false` the
    /// kernel scale stays fixed at its starting value for the whole solve.
    pub decrease_mu: bool,

    /// Floor below which the annealed kernel scale is not decreased further.
    pub maximum_correspondence_distance: f64,

    /// Number of Gauss-Newton iterations the solver runs.
    pub iteration_number: usize,

    /// Edge-length-ratio gate for tuple consistency pruning, in `(0, 1)`.
    pub tuple_scale: f64,

    /// Upper bound on the number of accepted tuples (each contributing 3
    /// correspondences to the output list).
    pub maximum_tuple_count: usize,

    /// Seed for the tuple sampler. Fixed by default so runs are reproducible;
    /// the source seeds from wall-clock, which this crate deliberately does
    /// not do (see the design notes on determinism).
    pub rng_seed: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            division_factor: 1.4,
            use_absolute_scale: false,
            decrease_mu: true,
            maximum_correspondence_distance: 0.025,
            iteration_number: 64,
            tuple_scale: 0.95,
            maximum_tuple_count: 1000,
            rng_seed: 0,
        }
    }
}
