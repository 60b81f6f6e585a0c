#[cfg(test)]
mod tests {
    use depth_clustering::params::{Parameters, SeedMode};
    use depth_clustering::{segment_frame, CancelToken};

    fn flat_gray_frame(width: u32, height: u32, depth_mm: u16) -> (Vec<u8>, Vec<u16>) {
        let color = vec![128u8; (width * height * 3) as usize];
        let depth = vec![depth_mm; (width * height) as usize];
        (color, depth)
    }

    #[test]
    fn solid_plane_splits_into_a_regular_grid() {
        let (width, height) = (64u32, 48u32);
        let (color, depth) = flat_gray_frame(width, height, 1000);
        let opt = Parameters {
            cluster_count: 12,
            iterations: 3,
            seed_mode: SeedMode::EquiDistant,
            ..Parameters::default()
        };

        let seg =
            segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new()).unwrap();

        assert_eq!(seg.clusters.len(), 12);
        // every pixel is covered and owned exactly once
        assert!(seg.pixel_labels.iter().all(|&l| l >= 0));
        let total: usize = seg.clusters.iter().map(|c| c.pixel_ids.len()).sum();
        assert_eq!(total, (width * height) as usize);
        let mut seen = vec![false; (width * height) as usize];
        for c in &seg.clusters {
            for &i in &c.pixel_ids {
                assert!(!seen[i]);
                seen[i] = true;
            }
        }
        // 4x3 layout of roughly 16x16 blocks
        for c in &seg.clusters {
            let n = c.pixel_ids.len();
            assert!((225..=289).contains(&n), "cluster size {n}");
        }
    }

    #[test]
    fn color_edge_keeps_clusters_pure() {
        let (width, height) = (32u32, 32u32);
        let mut color = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let i = ((y * width + x) * 3) as usize;
                if x < width / 2 {
                    color[i] = 255; // red
                } else {
                    color[i + 2] = 255; // blue
                }
            }
        }
        let depth = vec![1000u16; (width * height) as usize];
        let opt = Parameters {
            cluster_count: 16,
            iterations: 5,
            seed_mode: SeedMode::EquiDistant,
            ..Parameters::default()
        };

        let seg =
            segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new()).unwrap();

        assert!(!seg.clusters.is_empty());
        for (j, c) in seg.clusters.iter().enumerate() {
            let left = c
                .pixel_ids
                .iter()
                .filter(|&&i| (i as u32 % width) < width / 2)
                .count();
            assert!(
                left == 0 || left == c.pixel_ids.len(),
                "cluster {j} owns {left} of {} pixels on the red side",
                c.pixel_ids.len()
            );
        }
    }

    #[test]
    fn degenerate_frame_yields_an_empty_result() {
        let (width, height) = (32u32, 32u32);
        let color = vec![50u8; (width * height * 3) as usize];
        let depth = vec![0u16; (width * height) as usize];

        for seed_mode in [SeedMode::EquiDistant, SeedMode::DepthDependentMipmap] {
            let opt = Parameters {
                cluster_count: 8,
                iterations: 2,
                seed_mode,
                ..Parameters::default()
            };
            let seg =
                segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new())
                    .unwrap();

            assert!(seg.clusters.is_empty());
            assert!(seg.graph.edges.is_empty());
            assert_eq!(seg.labeling.num_labels, 0);
            assert!(seg.pixel_labels.iter().all(|&l| l == -1));
        }
    }

    #[test]
    fn cancellation_aborts_without_output() {
        let (width, height) = (64u32, 48u32);
        let (color, depth) = flat_gray_frame(width, height, 1000);
        let opt = Parameters {
            cluster_count: 12,
            iterations: 10,
            seed_mode: SeedMode::EquiDistant,
            ..Parameters::default()
        };

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = segment_frame(&color, &depth, None, width, height, &opt, &cancel);
        assert!(result.is_err());
    }

    #[test]
    fn identical_seeds_reproduce_identical_output() {
        let (width, height) = (64u32, 64u32);
        let color = vec![90u8; (width * height * 3) as usize];
        let mut depth = vec![0u16; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                depth[(y * width + x) as usize] = if x < width / 2 { 500 } else { 2000 };
            }
        }
        let opt = Parameters {
            cluster_count: 80,
            iterations: 2,
            seed_mode: SeedMode::DepthDependentMipmap,
            rng_seed: 1234,
            ..Parameters::default()
        };

        let a = segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new())
            .unwrap();
        let b = segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new())
            .unwrap();

        assert_eq!(a.clusters.len(), b.clusters.len());
        for (ca, cb) in a.clusters.iter().zip(&b.clusters) {
            assert_eq!(ca.pixel_ids, cb.pixel_ids);
            assert_eq!(ca.center.pos, cb.center.pos);
            assert_eq!(ca.center.color, cb.center.color);
            assert_eq!(ca.center.depth.to_bits(), cb.center.depth.to_bits());
        }
        assert_eq!(a.pixel_labels, b.pixel_labels);
        assert_eq!(a.graph.edges.len(), b.graph.edges.len());
        for (ea, eb) in a.graph.edges.iter().zip(&b.graph.edges) {
            assert_eq!(ea.weight.to_bits(), eb.weight.to_bits());
            assert_eq!(ea.border_pixels, eb.border_pixels);
        }
        assert_eq!(a.labeling, b.labeling);
    }

    #[test]
    fn refinement_does_not_increase_total_distance() {
        // identical depth and normals reduce the metric to color and
        // position, for which the assignment/update loop is monotone
        let (width, height) = (32u32, 32u32);
        let mut color = vec![0u8; (width * height * 3) as usize];
        for y in 0..height {
            for x in 0..width {
                let i = ((y * width + x) * 3) as usize;
                if x < width / 2 {
                    color[i] = 255;
                } else {
                    color[i + 2] = 255;
                }
            }
        }
        let depth = vec![1000u16; (width * height) as usize];

        let mut totals = Vec::new();
        for iterations in [1u32, 2, 3] {
            let opt = Parameters {
                cluster_count: 16,
                iterations,
                seed_mode: SeedMode::EquiDistant,
                ..Parameters::default()
            };
            let seg =
                segment_frame(&color, &depth, None, width, height, &opt, &CancelToken::new())
                    .unwrap();

            // the 16 clusters sit on an 8x8 grid, so the cell diagonal
            // normalizes the spatial weight
            let spatial_weight =
                f64::from(opt.weight_spatial) / f64::from((8f32 * 8.0 + 8.0 * 8.0).sqrt());
            let mut total = 0.0f64;
            for c in &seg.clusters {
                for &i in &c.pixel_ids {
                    let x = f64::from(i as u32 % width);
                    let y = f64::from(i as u32 / width);
                    let red = f64::from(color[3 * i]) / 255.0;
                    let blue = f64::from(color[3 * i + 2]) / 255.0;
                    let d_color = (red - f64::from(c.center.color.x)).powi(2)
                        + (blue - f64::from(c.center.color.z)).powi(2);
                    let d_pos = (x - f64::from(c.center.pos.x)).powi(2)
                        + (y - f64::from(c.center.pos.y)).powi(2);
                    total += (f64::from(opt.weight_color).powi(2) * d_color
                        + spatial_weight.powi(2) * d_pos)
                        .sqrt();
                }
            }
            totals.push(total);
        }

        assert!(totals[1] <= totals[0] * 1.001, "{totals:?}");
        assert!(totals[2] <= totals[1] * 1.001, "{totals:?}");
    }
}
