//! Genetic operators: tournament selection, uniform crossover, mutation
//!
//! Every operator that changes genes ends with [`Genome::repair`], so
//! children are always on-grid with a weight group summing to 1.0.

use rand::Rng;

use crate::genome::Genome;
use crate::learning::GuidanceHints;
use crate::params::{Gene, ParameterSpace};

/// Index of the fittest of `size` uniformly drawn contestants. Ties go to
/// the lower population index, so ranking stays reproducible.
pub fn tournament_select(population: &[Genome], size: usize, rng: &mut impl Rng) -> usize {
    let mut best = rng.gen_range(0..population.len());
    for _ in 1..size.max(1) {
        let contender = rng.gen_range(0..population.len());
        let (a, b) = (&population[contender], &population[best]);
        if a.fitness > b.fitness || (a.fitness == b.fitness && contender < best) {
            best = contender;
        }
    }
    best
}

/// Uniform crossover: each gene comes from either parent with equal odds
pub fn crossover(
    id: u64,
    a: &Genome,
    b: &Genome,
    space: &ParameterSpace,
    generation: u32,
    island_id: usize,
    rng: &mut impl Rng,
) -> Genome {
    let mut genes = a.genes;
    for gene in Gene::ALL {
        if rng.gen_bool(0.5) {
            genes[gene] = b.genes[gene];
        }
    }
    let mut child = Genome::new(id, genes, space, island_id);
    child.generation = generation;
    child.parent_ids = vec![a.id, b.id];
    child.mutation_log.push(format!("crossover({}, {})", a.id, b.id));
    child
}

/// Mutation settings for one mutation event
#[derive(Debug, Clone, Copy)]
pub struct MutationParams<'a> {
    /// Per-gene mutation probability
    pub rate: f64,
    /// Share of mutating genes that follow a guidance hint when one exists
    pub guided_fraction: f64,
    pub hints: Option<&'a GuidanceHints>,
}

/// Mutate `genome` in place. Booleans flip; numeric genes move a random
/// number of grid steps, or toward the hinted direction when guided.
/// Returns the number of genes changed.
pub fn mutate(
    genome: &mut Genome,
    params: MutationParams<'_>,
    space: &ParameterSpace,
    rng: &mut impl Rng,
) -> usize {
    let rate = params.rate.clamp(0.0, 1.0);
    let guided_fraction = params.guided_fraction.clamp(0.0, 1.0);
    let mut touched = Vec::new();

    for gene in Gene::ALL {
        if !rng.gen_bool(rate) {
            continue;
        }
        let spec = space.spec(gene);
        let before = genome.genes[gene];
        let index = spec.grid_index(before) as i64;
        let last = spec.grid_len() as i64;

        let (after, tag) = if spec.is_boolean {
            (if before >= 0.5 { 0.0 } else { 1.0 }, "flip")
        } else {
            let hint = params.hints.and_then(|h| h.direction(gene));
            match hint {
                Some(direction) if direction != 0.0 && rng.gen_bool(guided_fraction) => {
                    let steps = rng.gen_range(1..=3i64) * direction.signum() as i64;
                    let k = (index + steps).clamp(0, last) as u64;
                    (spec.value_at(k), "guided")
                }
                _ => {
                    let reach = (last / 10).max(1);
                    let mut steps = rng.gen_range(-reach..=reach);
                    if steps == 0 {
                        steps = if rng.gen_bool(0.5) { 1 } else { -1 };
                    }
                    let k = (index + steps).clamp(0, last) as u64;
                    (spec.value_at(k), "step")
                }
            }
        };

        if after != before {
            genome.genes[gene] = after;
            touched.push((gene, tag, before));
        }
    }

    // Weight groups are renormalized here, so log the repaired values
    genome.repair(space);
    let mut changed = 0;
    for (gene, tag, before) in touched {
        let after = genome.genes[gene];
        if after != before {
            genome
                .mutation_log
                .push(format!("{tag} {}: {before} -> {after}", gene.name()));
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::assert_genome_valid;
    use crate::params::WEIGHT_GENES;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn population(n: usize, rng: &mut StdRng) -> Vec<Genome> {
        let space = ParameterSpace::default();
        (0..n as u64)
            .map(|id| {
                let mut g = Genome::random(id, &space, 0, rng);
                g.fitness = id as f64;
                g.evaluated = true;
                g
            })
            .collect()
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let mut rng = StdRng::seed_from_u64(4);
        let pop = population(20, &mut rng);
        let picks: Vec<usize> = (0..500).map(|_| tournament_select(&pop, 5, &mut rng)).collect();
        let mean = picks.iter().sum::<usize>() as f64 / picks.len() as f64;
        assert!(mean > 12.0, "mean pick {mean}");
    }

    #[test]
    fn test_tournament_ties_go_to_lower_index() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut pop = population(2, &mut rng);
        for g in pop.iter_mut() {
            g.fitness = 1.0;
        }
        for _ in 0..50 {
            let pick = tournament_select(&pop, 64, &mut rng);
            assert_eq!(pick, 0);
        }
    }

    #[test]
    fn test_operators_preserve_invariants() {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(17);
        let pop = population(30, &mut rng);
        for i in 0..200u64 {
            let a = &pop[(i % 30) as usize];
            let b = &pop[((i * 7) % 30) as usize];
            let mut child = crossover(100 + i, a, b, &space, 1, 0, &mut rng);
            assert_genome_valid(&child, &space);
            assert_eq!(child.parent_ids, vec![a.id, b.id]);
            assert!(!child.evaluated);

            let params = MutationParams {
                rate: 0.5,
                guided_fraction: 0.0,
                hints: None,
            };
            mutate(&mut child, params, &space, &mut rng);
            assert_genome_valid(&child, &space);
        }
    }

    #[test]
    fn test_guided_mutation_moves_toward_hint() {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut hints = GuidanceHints::default();
        hints.set(Gene::RsiPeriod, 0.8);

        for _ in 0..50 {
            let mut genome = Genome::random(1, &space, 0, &mut rng);
            genome.genes[Gene::RsiPeriod] = 10.0;
            let params = MutationParams {
                rate: 1.0,
                guided_fraction: 1.0,
                hints: Some(&hints),
            };
            mutate(&mut genome, params, &space, &mut rng);
            assert!(genome.genes[Gene::RsiPeriod] > 10.0);
            assert!(genome.mutation_log.iter().any(|m| m.starts_with("guided rsi_period")));
        }
    }

    #[test]
    fn test_full_rate_flips_boolean() {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(8);
        let mut genome = Genome::random(1, &space, 0, &mut rng);
        let before = genome.genes[Gene::RequireVolumeConfirmation];
        let params = MutationParams {
            rate: 1.0,
            guided_fraction: 0.0,
            hints: None,
        };
        let changed = mutate(&mut genome, params, &space, &mut rng);
        assert!(changed > 0);
        assert_eq!(genome.genes[Gene::RequireVolumeConfirmation], 1.0 - before);
    }

    #[test]
    fn test_mutation_log_records_repaired_weights() {
        let space = ParameterSpace::default();
        let mut rng = StdRng::seed_from_u64(31);
        let mut genome = Genome::random(1, &space, 0, &mut rng);
        let params = MutationParams {
            rate: 1.0,
            guided_fraction: 0.0,
            hints: None,
        };
        let changed = mutate(&mut genome, params, &space, &mut rng);
        assert_eq!(changed, genome.mutation_log.len());

        let mut weights_logged = 0;
        for entry in &genome.mutation_log {
            let (head, after) = entry.split_once(" -> ").unwrap();
            let name = head.split_whitespace().nth(1).unwrap().trim_end_matches(':');
            let gene = Gene::ALL.into_iter().find(|g| g.name() == name).unwrap();
            assert_eq!(after.parse::<f64>().unwrap(), genome.genes[gene], "{entry}");
            if WEIGHT_GENES.contains(&gene) {
                weights_logged += 1;
            }
        }
        assert!(weights_logged > 0);
    }
}
