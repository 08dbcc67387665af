use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;

/// Power-law background `a * E^-r` plus a saw-tooth ionisation edge at `onset`.
fn eels_counts(energy: f64, onset: f64) -> f64 {
    let background = 2.0e10 * energy.powf(-3.0);
    let edge = if energy >= onset {
        40.0 * (energy / onset).powf(-4.0)
    } else {
        0.0
    };
    background + edge
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let output_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_spectrum.msa"));

    let mut rng = SimpleRng::new(42);

    // Energy loss: 250 → 799.5 eV, step 0.5 eV
    let energies: Vec<f64> = (0..1100).map(|i| 250.0 + i as f64 * 0.5).collect();
    let onset = 532.0;

    let mut text = String::new();
    writeln!(text, "#FORMAT      : EMSA/MAS Spectral Data File")?;
    writeln!(text, "#VERSION     : 1.0")?;
    writeln!(text, "#TITLE       : Synthetic O-K edge")?;
    writeln!(text, "#NPOINTS     : {}", energies.len())?;
    writeln!(text, "#NCOLUMNS    : 1")?;
    writeln!(text, "#XUNITS      : eV")?;
    writeln!(text, "#YUNITS      : counts")?;
    writeln!(text, "#DATATYPE    : XY")?;
    writeln!(text, "#SPECTRUM    : Spectral Data Starts Here")?;
    for &energy in &energies {
        let counts = eels_counts(energy, onset);
        // Poisson noise in its normal approximation
        let noisy = rng.gauss(counts, counts.sqrt()).max(0.0);
        writeln!(text, "{energy:.1}, {noisy:.2}")?;
    }
    writeln!(text, "#ENDOFDATA   :")?;

    std::fs::write(&output_path, text)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    log::info!(
        "Wrote {} points ({} eV edge) to {}",
        energies.len(),
        onset,
        output_path.display()
    );
    println!(
        "Wrote synthetic spectrum ({} points) to {}",
        energies.len(),
        output_path.display()
    );
    Ok(())
}
