use std::error::Error;

use zdrift::{Calibrator, CalibratorConfig, ProbeSample};

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <data_dir>", args[0]);
        std::process::exit(2);
    }

    let mut calibrator = Calibrator::open(&args[1], CalibratorConfig::default());
    if calibrator.store().is_empty() {
        println!("Empty history; seeding synthetic prints.");
        calibrator.recalibrate_baseline(-0.09)?;
        seed_history(&mut calibrator)?;
    }

    let model = calibrator.fit()?;
    println!(
        "Fitted {:?} model over {} samples ({} rejected), r^2 = {:.4} ± {:.4}",
        model.mode,
        model.stats.n_samples,
        model.stats.n_outliers,
        model.stats.r_squared,
        model.stats.error
    );
    for (name, factor) in &model.factors {
        println!("  {name:>24}  {factor:+.6}");
    }

    let probe = ProbeSample {
        nozzle_temperature: 225.0,
        bed_temperature: 65.0,
        sensor_temperature: 0.0,
        bed_surface_type: "textured_pei".to_string(),
        bed_probed_delta: 0.015,
    };
    let correction = calibrator.predict(&probe)?;
    println!("Suggested correction for the next print: {correction:+.5} mm");
    Ok(())
}

/// Twelve plausible prints: drift follows the probed delta and the bed
/// temperature, with one sloppy capture thrown in.
fn seed_history(calibrator: &mut Calibrator) -> Result<(), Box<dyn Error>> {
    let prints: [(f64, f64, f64); 12] = [
        (0.012, 220.0, 55.0),
        (-0.004, 215.0, 60.0),
        (0.021, 230.0, 65.0),
        (0.006, 220.0, 55.0),
        (-0.011, 210.0, 70.0),
        (0.017, 225.0, 60.0),
        (0.002, 220.0, 65.0),
        (-0.008, 215.0, 55.0),
        (0.024, 235.0, 70.0),
        (0.009, 220.0, 60.0),
        (-0.002, 210.0, 65.0),
        (0.014, 225.0, 55.0),
    ];
    for (i, (delta, nozzle, bed)) in prints.iter().enumerate() {
        let probe = ProbeSample {
            nozzle_temperature: *nozzle,
            bed_temperature: *bed,
            sensor_temperature: 0.0,
            bed_surface_type: "textured_pei".to_string(),
            bed_probed_delta: *delta,
        };
        let mut z_offset = 0.55 * delta - 0.0003 * bed + 0.002;
        if i == 7 {
            // a print where the operator overshot the babystep wheel
            z_offset += 0.06;
        }
        calibrator.record_observation(&probe)?;
        calibrator.complete_observation(z_offset)?;
    }
    Ok(())
}
