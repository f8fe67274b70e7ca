use std::collections::BTreeMap;
use std::fs;

use crate::error::{Error, Result};

/// CPU layout of the machine under test.
///
/// `seq_cores` lists logical cpu ids in the order benchmarks should occupy
/// them: every physical core of socket 0, then socket 1 and so on, with SMT
/// siblings appended after all physical cores.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CpuTopology {
    pub model_name: String,
    pub physical_chips: usize,
    pub cores_per_chip: usize,
    pub smt_level: usize,
    pub seq_cores: Vec<usize>,
}

impl CpuTopology {
    /// A machine with contiguous cpu ids and no SMT interleaving.
    pub fn uniform(physical_chips: usize, cores_per_chip: usize, smt_level: usize) -> Self {
        CpuTopology {
            model_name: String::from("unknown"),
            physical_chips,
            cores_per_chip,
            smt_level,
            seq_cores: (0..physical_chips * cores_per_chip * smt_level).collect(),
        }
    }

    pub fn detect() -> Result<Self> {
        let cpuinfo = fs::read_to_string("/proc/cpuinfo")?;
        Self::from_cpuinfo(&cpuinfo)
    }

    pub fn from_cpuinfo(cpuinfo: &str) -> Result<Self> {
        let mut model_name = String::from("unknown");
        // (physical id, core id) -> logical cpu ids
        let mut cores: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
        let mut nthreads = 0;
        for block in cpuinfo.split("\n\n").filter(|b| !b.trim().is_empty()) {
            let mut processor = None;
            let mut physical_id = 0;
            let mut core_id = None;
            for line in block.lines() {
                let (key, value) = match line.find(':') {
                    Some(idx) => (line[..idx].trim(), line[idx + 1..].trim()),
                    None => continue,
                };
                match key {
                    "processor" => processor = value.parse::<usize>().ok(),
                    "physical id" => physical_id = value.parse().unwrap_or(0),
                    "core id" => core_id = value.parse::<usize>().ok(),
                    "model name" => model_name = value.to_string(),
                    _ => {}
                }
            }
            let processor = match processor {
                Some(p) => p,
                None => continue,
            };
            nthreads += 1;
            let core_id = core_id.unwrap_or(processor);
            cores
                .entry((physical_id, core_id))
                .or_insert_with(Vec::new)
                .push(processor);
        }
        if cores.is_empty() {
            return Err(Error::invalid_arg("no processors found in cpuinfo"));
        }

        let mut per_chip: BTreeMap<usize, usize> = BTreeMap::new();
        for &(chip, _) in cores.keys() {
            *per_chip.entry(chip).or_insert(0) += 1;
        }
        let physical_chips = per_chip.len();
        let cores_per_chip = per_chip.values().cloned().max().unwrap_or(1);
        let smt_level = std::cmp::max(1, nthreads / (physical_chips * cores_per_chip));

        let mut seq_cores = Vec::with_capacity(nthreads);
        for thread in 0..smt_level {
            for siblings in cores.values_mut() {
                siblings.sort();
                if let Some(&cpu) = siblings.get(thread) {
                    seq_cores.push(cpu);
                }
            }
        }

        Ok(CpuTopology {
            model_name,
            physical_chips,
            cores_per_chip,
            smt_level,
            seq_cores,
        })
    }

    /// Physical cores across all sockets.
    pub fn physical_cores(&self) -> usize {
        self.physical_chips * self.cores_per_chip
    }

    pub fn hardware_threads(&self) -> usize {
        self.physical_cores() * self.smt_level
    }

    /// Sequential core order with the cores reserved for delegation threads
    /// removed: the first `threads` cores of each of the first `sockets`
    /// sockets.
    pub fn app_cores(&self, threads: usize, sockets: usize) -> Vec<usize> {
        let reserved: Vec<usize> = (0..sockets)
            .flat_map(|socket| (0..threads).map(move |t| socket * self.cores_per_chip + t))
            .collect();
        self.seq_cores
            .iter()
            .cloned()
            .filter(|cpu| !reserved.contains(cpu))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpuinfo(entries: &[(usize, usize, usize)]) -> String {
        entries
            .iter()
            .map(|&(cpu, chip, core)| {
                format!(
                    "processor\t: {}\nmodel name\t: Test CPU\nphysical id\t: {}\ncore id\t\t: {}\n",
                    cpu, chip, core
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn two_sockets_with_smt() {
        // cpus 0-3 are first threads, 4-7 their siblings
        let info = cpuinfo(&[
            (0, 0, 0),
            (1, 0, 1),
            (2, 1, 0),
            (3, 1, 1),
            (4, 0, 0),
            (5, 0, 1),
            (6, 1, 0),
            (7, 1, 1),
        ]);
        let topo = CpuTopology::from_cpuinfo(&info).expect("failed to parse cpuinfo");
        assert_eq!(topo.model_name, "Test CPU");
        assert_eq!(topo.physical_chips, 2);
        assert_eq!(topo.cores_per_chip, 2);
        assert_eq!(topo.smt_level, 2);
        assert_eq!(topo.seq_cores, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(topo.physical_cores(), 4);
        assert_eq!(topo.hardware_threads(), 8);
    }

    #[test]
    fn interleaved_numbering_is_ordered_by_socket() {
        // even cpus on socket 0, odd cpus on socket 1
        let info = cpuinfo(&[(0, 0, 0), (1, 1, 0), (2, 0, 1), (3, 1, 1)]);
        let topo = CpuTopology::from_cpuinfo(&info).expect("failed to parse cpuinfo");
        assert_eq!(topo.seq_cores, vec![0, 2, 1, 3]);
        assert_eq!(topo.smt_level, 1);
    }

    #[test]
    fn empty_cpuinfo_is_rejected() {
        assert!(CpuTopology::from_cpuinfo("").is_err());
    }

    #[test]
    fn app_cores_skip_delegation_cores() {
        let topo = CpuTopology::uniform(2, 4, 1);
        assert_eq!(topo.app_cores(0, 2), (0..8).collect::<Vec<_>>());
        assert_eq!(topo.app_cores(1, 2), vec![1, 2, 3, 5, 6, 7]);
        assert_eq!(topo.app_cores(2, 1), vec![2, 3, 4, 5, 6, 7]);
    }
}
