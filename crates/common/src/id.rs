use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Mutex,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Generator epoch: 2024-01-01T00:00:00Z, in milliseconds.
const EPOCH_MS: u64 = 1_704_067_200_000;
/// One tick is 10 ms.
const TICK_MS: u64 = 10;
const SEQUENCE_BITS: u32 = 8;
const MACHINE_BITS: u32 = 16;
const MAX_SEQUENCE: u16 = (1 << SEQUENCE_BITS) - 1;
/// 39 bits of tick + 8 bits of sequence + 16 bits of machine id.
const TIME_BITS: u32 = 39;

struct IdState {
    last_tick: u64,
    sequence: u16,
}

/// Distributed monotonic id generator.
///
/// Ids are strictly unique across the deployment (distinct machine ids) and
/// approximately time-ordered: the high 39 bits are a 10 ms tick counter, so
/// ids sort by creation time down to tick granularity. When a tick's
/// 256-id sequence is exhausted the generator sleeps to the next tick, and a
/// backwards clock step is absorbed by reusing the last observed tick.
pub struct IdGenerator {
    machine_id: u16,
    state: Mutex<IdState>,
}

impl IdGenerator {
    /// Machine id derived from the hostname; falls back to the process id
    /// when no hostname is available.
    #[must_use]
    pub fn new() -> Self {
        let mut hasher = DefaultHasher::new();
        crate::local_hostname().hash(&mut hasher);
        std::process::id().hash(&mut hasher);
        Self::with_machine_id(hasher.finish() as u16)
    }

    #[must_use]
    pub fn with_machine_id(machine_id: u16) -> Self {
        Self {
            machine_id,
            state: Mutex::new(IdState {
                last_tick: 0,
                sequence: 0,
            }),
        }
    }

    pub fn next_id(&self) -> u64 {
        loop {
            {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let mut tick = current_tick();
                // Tolerate clock skew: never step backwards.
                if tick < state.last_tick {
                    tick = state.last_tick;
                }
                if tick == state.last_tick {
                    if state.sequence < MAX_SEQUENCE {
                        state.sequence += 1;
                        return compose(tick, state.sequence, self.machine_id);
                    }
                    // Sequence exhausted for this tick; wait outside the lock.
                } else {
                    state.last_tick = tick;
                    state.sequence = 0;
                    return compose(tick, 0, self.machine_id);
                }
            }
            std::thread::sleep(Duration::from_millis(TICK_MS));
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn current_tick() -> u64 {
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    now_ms.saturating_sub(EPOCH_MS) / TICK_MS
}

fn compose(tick: u64, sequence: u16, machine_id: u16) -> u64 {
    let tick = tick & ((1 << TIME_BITS) - 1);
    (tick << (SEQUENCE_BITS + MACHINE_BITS))
        | (u64::from(sequence) << MACHINE_BITS)
        | u64::from(machine_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique() {
        let generator = IdGenerator::with_machine_id(1);
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(generator.next_id()));
        }
    }

    #[test]
    fn ids_are_time_ordered_across_ticks() {
        let generator = IdGenerator::with_machine_id(1);
        let first = generator.next_id();
        std::thread::sleep(Duration::from_millis(2 * TICK_MS));
        let second = generator.next_id();
        assert!(second > first);
    }

    #[test]
    fn distinct_machines_never_collide() {
        let a = IdGenerator::with_machine_id(1);
        let b = IdGenerator::with_machine_id(2);
        let ids_a: HashSet<u64> = (0..1000).map(|_| a.next_id()).collect();
        let ids_b: HashSet<u64> = (0..1000).map(|_| b.next_id()).collect();
        assert!(ids_a.is_disjoint(&ids_b));
    }

    #[test]
    fn unique_under_contention() {
        let generator = std::sync::Arc::new(IdGenerator::with_machine_id(3));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let generator = std::sync::Arc::clone(&generator);
            handles.push(std::thread::spawn(move || {
                (0..2000).map(|_| generator.next_id()).collect::<Vec<_>>()
            }));
        }
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().expect("generator thread panicked") {
                assert!(seen.insert(id));
            }
        }
    }
}
