//! Fronthaul Driver Configuration
//! 
//! TOML configuration of the O-DU fronthaul driver. Every field has a
//! default so a minimal file only names what differs.

use std::path::Path;

use anyhow::{bail, Context, Result};
use common::{num_rbs, Direction, DuplexMode, Numerology};
use fronthaul::cplane::ext::DssPattern;
use fronthaul::cplane::{Category, PrbElement, PrbMap, SectionIdTagging};
use fronthaul::frame::{FrameStructure, SlotConfig, MAX_TDD_PERIOD};
use fronthaul::timing::{DelayBudget, DlCpMode, Role};
use interfaces::ecpri::EaxcIdConfig;
use serde::{Deserialize, Serialize};

/// Driver configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FronthaulConfig {
    /// Numerology (mu)
    #[serde(default = "default_numerology")]
    pub numerology: Numerology,
    /// Component carriers
    #[serde(default = "default_num_cc")]
    pub num_cc: u8,
    /// eAxC (RU ports) per carrier
    #[serde(default = "default_num_eaxc")]
    pub num_eaxc: u8,
    /// O-RU category
    #[serde(default)]
    pub category: Category,
    /// DL C-Plane layout over the slot
    #[serde(default)]
    pub dl_cp_mode: DlCpMode,
    #[serde(default)]
    pub role: Role,
    /// Largest Ethernet frame in bytes
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Carrier bandwidth in MHz
    #[serde(default = "default_bandwidth_mhz")]
    pub bandwidth_mhz: u32,
    /// Point A frequency in kHz
    #[serde(default = "default_point_a_khz")]
    pub point_a_khz: u32,
    #[serde(default)]
    pub eaxc_id: EaxcIdConfig,
    #[serde(default)]
    pub section_id_tagging: SectionIdTagging,
    #[serde(default)]
    pub delay_budget: DelayBudget,
    /// TDD pattern; FDD when absent
    #[serde(default)]
    pub tdd: Option<TddConfig>,
    #[serde(default)]
    pub prb_map: PrbMapConfig,
    /// Expected technology per slot for DSS carriers
    #[serde(default)]
    pub dss: Option<DssPattern>,
    /// Slots to run before stopping
    #[serde(default = "default_run_slots")]
    pub run_slots: u64,
    /// Worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pacing of the emulated OTA symbol tick; 0 runs unpaced
    #[serde(default = "default_tick_interval_us")]
    pub tick_interval_us: u64,
}

/// Per-slot symbol patterns of the TDD period
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TddConfig {
    /// One 14-character `D`/`G`/`U` string per slot
    pub patterns: Vec<String>,
}

/// PRB elements scheduled in every slot
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrbMapConfig {
    #[serde(default = "default_prb_elements")]
    pub dl: Vec<PrbElement>,
    #[serde(default = "default_prb_elements")]
    pub ul: Vec<PrbElement>,
}

impl Default for PrbMapConfig {
    fn default() -> Self {
        Self {
            dl: default_prb_elements(),
            ul: default_prb_elements(),
        }
    }
}

fn default_numerology() -> Numerology {
    Numerology::MU1
}

fn default_num_cc() -> u8 {
    1
}

fn default_num_eaxc() -> u8 {
    4
}

fn default_mtu() -> usize {
    9600
}

fn default_bandwidth_mhz() -> u32 {
    100
}

fn default_point_a_khz() -> u32 {
    3_500_000
}

fn default_prb_elements() -> Vec<PrbElement> {
    vec![PrbElement::new(0, 273, 0)]
}

fn default_run_slots() -> u64 {
    200
}

fn default_workers() -> usize {
    2
}

fn default_tick_interval_us() -> u64 {
    0
}

impl Default for FronthaulConfig {
    fn default() -> Self {
        Self {
            numerology: default_numerology(),
            num_cc: default_num_cc(),
            num_eaxc: default_num_eaxc(),
            category: Category::default(),
            dl_cp_mode: DlCpMode::default(),
            role: Role::default(),
            mtu: default_mtu(),
            bandwidth_mhz: default_bandwidth_mhz(),
            point_a_khz: default_point_a_khz(),
            eaxc_id: EaxcIdConfig::default(),
            section_id_tagging: SectionIdTagging::default(),
            delay_budget: DelayBudget::default(),
            tdd: None,
            prb_map: PrbMapConfig::default(),
            dss: None,
            run_slots: default_run_slots(),
            workers: default_workers(),
            tick_interval_us: default_tick_interval_us(),
        }
    }
}

impl FronthaulConfig {
    /// Load and validate a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing configuration {}", path.display()))
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_cc == 0 || self.num_eaxc == 0 {
            bail!("num_cc and num_eaxc must be at least 1");
        }
        if self.workers == 0 {
            bail!("at least one worker is required");
        }
        if let Some(tdd) = &self.tdd {
            if tdd.patterns.is_empty() || tdd.patterns.len() > MAX_TDD_PERIOD {
                bail!("TDD period of {} slots, expected 1..={}", tdd.patterns.len(), MAX_TDD_PERIOD);
            }
        }
        self.eaxc_id.validate()?;
        self.prb_map(Direction::Dl)?;
        self.prb_map(Direction::Ul)?;
        Ok(())
    }

    /// Duplex mode implied by the TDD section
    pub fn duplex(&self) -> DuplexMode {
        if self.tdd.is_some() {
            DuplexMode::Tdd
        } else {
            DuplexMode::Fdd
        }
    }

    /// Frame structure of the carrier
    pub fn frame_structure(&self) -> Result<FrameStructure> {
        match &self.tdd {
            None => Ok(FrameStructure::fdd(self.numerology)),
            Some(tdd) => {
                let slots = tdd
                    .patterns
                    .iter()
                    .map(|p| SlotConfig::from_pattern(p))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(FrameStructure::tdd(self.numerology, &slots)?)
            }
        }
    }

    /// PRB map of every slot in direction `dir`
    pub fn prb_map(&self, dir: Direction) -> Result<PrbMap> {
        let elements = match dir {
            Direction::Dl => self.prb_map.dl.clone(),
            Direction::Ul => self.prb_map.ul.clone(),
        };
        Ok(PrbMap::new(dir, elements)?)
    }

    /// PRBs of the carrier, if the bandwidth is in the NR tables
    pub fn carrier_prbs(&self) -> Option<u16> {
        match num_rbs(self.numerology.value(), self.bandwidth_mhz, self.point_a_khz) {
            0 => None,
            n => Some(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::CompMethod;
    
    #[test]
    fn test_empty_file_uses_defaults() {
        let config = FronthaulConfig::from_toml_str("").unwrap();
        assert_eq!(config.numerology, Numerology::MU1);
        assert_eq!(config.num_eaxc, 4);
        assert_eq!(config.dl_cp_mode, DlCpMode::Burst);
        assert_eq!(config.role, Role::ODu);
        assert_eq!(config.duplex(), DuplexMode::Fdd);
        assert_eq!(config.carrier_prbs(), Some(273));
        assert_eq!(config.prb_map(Direction::Dl).unwrap().num_elements(), 1);
    }
    
    #[test]
    fn test_full_config() {
        let text = r#"
            numerology = 1
            num_cc = 2
            num_eaxc = 2
            category = "b"
            dl_cp_mode = "spread"
            role = "o_du"
            mtu = 1500
            run_slots = 40
            
            [delay_budget]
            t1a_max_cp_dl = 224
            ta4_max = 331
            
            [tdd]
            patterns = ["DDDDDDDDDDDDDD", "DDDDDDGGGGUUUU", "UUUUUUUUUUUUUU"]
            
            [[prb_map.dl]]
            rb_start = 0
            rb_size = 100
            beam_index = 1
            comp_method = "block_floating_point"
            iq_width = 9
            
            [[prb_map.dl]]
            rb_start = 100
            rb_size = 173
            beam_index = 2
        "#;
        let config = FronthaulConfig::from_toml_str(text).unwrap();
        assert_eq!(config.category, Category::B);
        assert_eq!(config.dl_cp_mode, DlCpMode::Spread);
        assert_eq!(config.delay_budget.t1a_max_cp_dl, 224);
        assert_eq!(config.delay_budget.t1a_max_up, DelayBudget::default().t1a_max_up);
        
        let frame = config.frame_structure().unwrap();
        assert_eq!(frame.period(), 3);
        assert!(frame.is_special(1));
        
        let dl = config.prb_map(Direction::Dl).unwrap();
        assert_eq!(dl.num_elements(), 2);
        assert_eq!(dl.elements[0].comp_method, CompMethod::BlockFloatingPoint);
        assert_eq!(dl.elements[1].num_sym, 14);
        // UL keeps its default map
        assert_eq!(config.prb_map(Direction::Ul).unwrap().elements[0].rb_size, 273);
    }
    
    #[test]
    fn test_invalid_configs_rejected() {
        assert!(FronthaulConfig::from_toml_str("numerology = 5").is_err());
        assert!(FronthaulConfig::from_toml_str("num_eaxc = 0").is_err());
        assert!(FronthaulConfig::from_toml_str("[tdd]\npatterns = [\"DDDDDDDDDDDDD\"]")
            .and_then(|c| c.frame_structure())
            .is_err());
        assert!(FronthaulConfig::from_toml_str("[[prb_map.dl]]\nrb_start = 0\nrb_size = 0").is_err());
    }
    
    #[test]
    fn test_sample_file_parses() {
        let config = FronthaulConfig::from_toml_str(include_str!("../fronthaul.toml")).unwrap();
        assert!(config.run_slots > 0);
        config.frame_structure().unwrap();
    }
}
