/// Spread convention throughout the crate: the line is quoted on the home
/// side, negative when home is favored ("Duke -5.5" stores -5.5).
///
/// The spread-to-probability mapping is a calibration choice, so it lives
/// behind a versioned trait instead of an inlined formula.
pub trait SpreadProbModel: Send + Sync {
    /// Identifier recorded alongside backtest output so ledgers from
    /// different calibrations never get compared blindly.
    fn version(&self) -> &'static str;

    /// Probability the home side wins outright given the quoted spread.
    /// Must be monotone decreasing in `spread` (more negative = stronger
    /// home favorite = higher probability).
    fn home_win_prob(&self, spread: f64) -> f64;
}

/// Normal-CDF transform: margin ~ N(-spread, sigma^2), so
/// P(home wins) = Phi(-spread / sigma). Sigma is the empirical stddev of
/// final margin around the market line, about 11 points in this sport.
#[derive(Debug, Clone, Copy)]
pub struct NormalSpreadModel {
    pub sigma: f64,
}

pub const DEFAULT_SPREAD_SIGMA: f64 = 11.0;

impl Default for NormalSpreadModel {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SPREAD_SIGMA,
        }
    }
}

impl SpreadProbModel for NormalSpreadModel {
    fn version(&self) -> &'static str {
        "normal_cdf_v1"
    }

    fn home_win_prob(&self, spread: f64) -> f64 {
        let sigma = self.sigma.max(1e-6);
        let z = -spread / sigma;
        let prob = 0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2));
        prob.clamp(0.01, 0.99)
    }
}

/// Implied probability of an American price, vig included.
pub fn american_implied_prob(price: i32) -> f64 {
    let p = price as f64;
    if price < 0 {
        -p / (-p + 100.0)
    } else {
        100.0 / (p + 100.0)
    }
}

/// Net profit per unit staked at an American price (decimal odds minus one).
pub fn american_payout_per_unit(price: i32) -> f64 {
    let p = price as f64;
    if price < 0 {
        100.0 / -p
    } else {
        p / 100.0
    }
}

/// Strip the vig from a two-way market by normalizing the implied pair.
/// Returns (side_a, side_b) fair probabilities.
pub fn devig_two_way(price_a: i32, price_b: i32) -> (f64, f64) {
    let pa = american_implied_prob(price_a);
    let pb = american_implied_prob(price_b);
    let overround = (pa + pb).max(1e-9);
    (pa / overround, pb / overround)
}

/// Abramowitz & Stegun 7.1.26 rational approximation, max error ~1.5e-7.
/// Plenty for a probability that then meets a minimum-edge threshold.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}
