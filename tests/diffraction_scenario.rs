// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end check of the diffraction pipeline at the Low tier: a centered
//! circular aperture lit by a single green term must produce a green,
//! Airy-like filter that falls off radially from the center.

use lens_diffraction::{
    compose_aperture, ApertureDefinition, ApertureLayer, DiffractionEngine, Quality, SpectralTerm,
};

#[test]
fn disk_aperture_produces_a_green_airy_pattern() {
    let size = Quality::Low.diffraction_resolution();
    assert_eq!(size, 256);

    let mut engine = DiffractionEngine::new(size, size).unwrap();

    // White disk of radius 64px on black: radius 0.5 in normalized units
    let aperture = compose_aperture(size, &[ApertureLayer::Disk { radius: 0.5, softness: 0.0 }]).unwrap();

    let definition = ApertureDefinition::new(vec![SpectralTerm::new(550.0, 0.0, 1.0, 0.0)], 1.0);
    let filter = engine.diffract(&aperture, &definition, 1.0).unwrap();

    let center = (size / 2) as i64;

    // Predominantly green: the green channel carries the unit energy, red and
    // blue never received a contribution
    let mut green_sum = 0.0f64;
    let mut red_sum = 0.0f64;
    let mut blue_sum = 0.0f64;
    for y in 0..size {
        for x in 0..size {
            let px = filter.texel(x as i64, y as i64, [0.0; 4]);
            red_sum += px[0] as f64;
            green_sum += px[1] as f64;
            blue_sum += px[2] as f64;
        }
    }
    assert!((green_sum - 1.0).abs() < 0.02, "green integrates to {}", green_sum);
    assert!(red_sum.abs() < 1e-2, "red leaked {}", red_sum);
    assert!(blue_sum.abs() < 1e-2, "blue leaked {}", blue_sum);

    // Radially non-increasing ring averages over the first rings of the
    // Airy core
    let ring_average = |radius: i64| -> f64 {
        if radius == 0 {
            return filter.texel(center, center, [0.0; 4])[1] as f64;
        }
        let mut sum = 0.0f64;
        let mut count = 0u32;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let d2 = dx * dx + dy * dy;
                if d2 > (radius - 1) * (radius - 1) && d2 <= radius * radius {
                    sum += filter.texel(center + dx, center + dy, [0.0; 4])[1] as f64;
                    count += 1;
                }
            }
        }
        sum / count as f64
    };

    let rings: Vec<f64> = (0..4).map(ring_average).collect();
    assert!(rings[0] > 0.0);
    for i in 0..rings.len() - 1 {
        assert!(
            rings[i + 1] <= rings[i] * 1.05 + 1e-9,
            "ring averages not non-increasing: {:?}", rings
        );
    }

    // The center pixel is the global maximum
    let mut max_v = f32::MIN;
    let mut max_at = (0i64, 0i64);
    for y in 0..size {
        for x in 0..size {
            let v = filter.texel(x as i64, y as i64, [0.0; 4])[1];
            if v > max_v {
                max_v = v;
                max_at = (x as i64, y as i64);
            }
        }
    }
    assert_eq!(max_at, (center, center));
}
