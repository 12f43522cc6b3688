//! Mock 线路后端
//!
//! 用于测试和 `--mock` 空跑：输出线路记录电平和跳变次数，
//! 输入线路的电平由测试通过 [`MockProbe::set_level`] 注入。

use crate::{GpioError, InputLine, LineClaim, LineClaims, LineId, LineProvider, OutputLine};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// 线路观察探针（可跨所有权克隆）
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    level: Arc<AtomicBool>,
    transitions: Arc<AtomicU32>,
    writes: Arc<AtomicU32>,
}

impl MockProbe {
    pub fn new(level: bool) -> Self {
        Self {
            level: Arc::new(AtomicBool::new(level)),
            ..Self::default()
        }
    }

    /// 当前电平
    pub fn level(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }

    /// 注入电平（用于模拟输入信号）
    pub fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::Relaxed);
    }

    /// 电平跳变次数
    pub fn transitions(&self) -> u32 {
        self.transitions.load(Ordering::Relaxed)
    }

    /// 写入次数（包括电平不变的写入）
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::Relaxed)
    }

    fn record_write(&self, high: bool) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.level.swap(high, Ordering::Relaxed) != high {
            self.transitions.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Mock 输出线路
#[derive(Debug)]
pub struct MockOutput {
    id: LineId,
    probe: MockProbe,
    _claim: Option<LineClaim>,
}

impl MockOutput {
    /// 创建一根独立的输出线路，返回线路和它的探针
    pub fn new(id: LineId) -> (Self, MockProbe) {
        let probe = MockProbe::default();
        (
            Self {
                id,
                probe: probe.clone(),
                _claim: None,
            },
            probe,
        )
    }
}

impl OutputLine for MockOutput {
    fn id(&self) -> LineId {
        self.id
    }

    fn set(&mut self, high: bool) -> Result<(), GpioError> {
        self.probe.record_write(high);
        Ok(())
    }
}

/// Mock 输入线路
#[derive(Debug)]
pub struct MockInput {
    id: LineId,
    probe: MockProbe,
    _claim: Option<LineClaim>,
}

impl MockInput {
    pub fn new(id: LineId) -> (Self, MockProbe) {
        let probe = MockProbe::default();
        (
            Self {
                id,
                probe: probe.clone(),
                _claim: None,
            },
            probe,
        )
    }
}

impl InputLine for MockInput {
    fn id(&self) -> LineId {
        self.id
    }

    fn get(&mut self) -> Result<bool, GpioError> {
        Ok(self.probe.level())
    }
}

/// Mock 线路提供者
///
/// 保留每根已申请线路的探针，装配完成后仍可通过 [`MockProvider::probe`] 观察。
#[derive(Debug, Default)]
pub struct MockProvider {
    claims: LineClaims,
    probes: HashMap<LineId, MockProbe>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self, id: LineId) -> Option<MockProbe> {
        self.probes.get(&id).cloned()
    }

    /// 当前仍被持有的线路数
    pub fn claimed(&self) -> usize {
        self.claims.len()
    }
}

impl LineProvider for MockProvider {
    fn output(
        &mut self,
        id: LineId,
        consumer: &str,
        initial: bool,
    ) -> Result<Box<dyn OutputLine>, GpioError> {
        let claim = self.claims.claim(id)?;
        tracing::debug!("mock output {} ({}) initial={}", id, consumer, initial);

        let probe = MockProbe::new(initial);
        self.probes.insert(id, probe.clone());
        Ok(Box::new(MockOutput {
            id,
            probe,
            _claim: Some(claim),
        }))
    }

    fn input(&mut self, id: LineId, consumer: &str) -> Result<Box<dyn InputLine>, GpioError> {
        let claim = self.claims.claim(id)?;
        tracing::debug!("mock input {} ({})", id, consumer);

        let probe = MockProbe::default();
        self.probes.insert(id, probe.clone());
        Ok(Box::new(MockInput {
            id,
            probe,
            _claim: Some(claim),
        }))
    }
}
