use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use flyover_swap::chain::{
    BitcoinConnection, BtcDeposit, BtcOutput, BtcTransaction, ChainError, EventFilter, LbcCall,
    LbcCallResult, LbcEvent, RskConnection,
};
use flyover_swap::quote::QuoteHash;

fn take_failure(counter: &AtomicU32) -> Result<(), ChainError> {
    let failed = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failed {
        Err(ChainError::Unavailable("injected failure".into()))
    } else {
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeBitcoin {
    tip: AtomicU32,
    deposits: Mutex<HashMap<String, Vec<BtcDeposit>>>,
    op_returns: Mutex<HashMap<String, Vec<u8>>>,
    next_tx: AtomicU32,
    fail_next: AtomicU32,
    calls: AtomicU32,
}

impl FakeBitcoin {
    pub fn new(tip: u32) -> Self {
        let btc = Self::default();
        btc.tip.store(tip, Ordering::SeqCst);
        btc
    }

    pub fn set_tip(&self, tip: u32) {
        self.tip.store(tip, Ordering::SeqCst);
    }

    pub fn mine(&self, blocks: u32) {
        self.tip.fetch_add(blocks, Ordering::SeqCst);
    }

    /// Adds an output paying `address`, mined at `block_height` (`None` for mempool).
    pub fn pay(&self, address: &str, value_sats: u64, block_height: Option<u32>) -> String {
        let txid = format!("{:064x}", self.next_tx.fetch_add(1, Ordering::SeqCst) + 1);
        self.deposits
            .lock()
            .expect("deposits mutex poisoned")
            .entry(address.to_string())
            .or_default()
            .push(BtcDeposit {
                txid: txid.clone(),
                vout: 0,
                value_sats,
                block_height,
            });
        txid
    }

    /// Like `pay`, with an extra `OP_RETURN` output carrying `hash`.
    pub fn pay_for_quote(
        &self,
        address: &str,
        value_sats: u64,
        block_height: Option<u32>,
        hash: &QuoteHash,
    ) -> String {
        let txid = self.pay(address, value_sats, block_height);
        self.op_returns
            .lock()
            .expect("op_returns mutex poisoned")
            .insert(txid.clone(), hash.as_bytes().to_vec());
        txid
    }

    /// The next `n` calls fail with `ChainError::Unavailable`.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        take_failure(&self.fail_next)
    }
}

#[async_trait]
impl BitcoinConnection for FakeBitcoin {
    async fn tip_height(&self) -> Result<u32, ChainError> {
        self.enter()?;
        Ok(self.tip.load(Ordering::SeqCst))
    }

    async fn get_balance(&self, address: &str) -> Result<u64, ChainError> {
        self.enter()?;
        let deposits = self.deposits.lock().expect("deposits mutex poisoned");
        Ok(deposits
            .get(address)
            .map(|d| d.iter().map(|d| d.value_sats).sum())
            .unwrap_or(0))
    }

    async fn send_raw_transaction(&self, tx_hex: &str) -> Result<String, ChainError> {
        self.enter()?;
        Ok(format!("{:064x}", tx_hex.len()))
    }

    async fn get_transaction(&self, txid: &str) -> Result<Option<BtcTransaction>, ChainError> {
        self.enter()?;
        let deposits = self.deposits.lock().expect("deposits mutex poisoned");
        let op_return = self
            .op_returns
            .lock()
            .expect("op_returns mutex poisoned")
            .get(txid)
            .cloned();
        Ok(deposits.iter().find_map(|(address, deposits)| {
            deposits.iter().find(|d| d.txid == txid).map(|d| {
                let mut outputs = vec![BtcOutput {
                    address: Some(address.clone()),
                    value_sats: d.value_sats,
                    op_return: None,
                }];
                if let Some(data) = &op_return {
                    outputs.push(BtcOutput {
                        address: None,
                        value_sats: 0,
                        op_return: Some(data.clone()),
                    });
                }
                BtcTransaction {
                    txid: d.txid.clone(),
                    block_height: d.block_height,
                    outputs,
                }
            })
        }))
    }

    async fn watch_address(&self, address: &str) -> Result<Vec<BtcDeposit>, ChainError> {
        self.enter()?;
        let deposits = self.deposits.lock().expect("deposits mutex poisoned");
        Ok(deposits.get(address).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct FakeRsk {
    block: AtomicU64,
    events: Mutex<Vec<LbcEvent>>,
    completed: Mutex<HashSet<QuoteHash>>,
    fail_next: AtomicU32,
    unavailable: AtomicBool,
    calls: AtomicU32,
}

impl FakeRsk {
    pub fn new(block: u64) -> Self {
        let rsk = Self::default();
        rsk.block.store(block, Ordering::SeqCst);
        rsk
    }

    pub fn set_block(&self, block: u64) {
        self.block.store(block, Ordering::SeqCst);
    }

    pub fn block(&self) -> u64 {
        self.block.load(Ordering::SeqCst)
    }

    pub fn emit(&self, event: LbcEvent) {
        self.events
            .lock()
            .expect("events mutex poisoned")
            .push(event);
    }

    pub fn mark_completed(&self, hash: QuoteHash) {
        self.completed
            .lock()
            .expect("completed mutex poisoned")
            .insert(hash);
    }

    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> Result<(), ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("node down".into()));
        }
        take_failure(&self.fail_next)
    }
}

#[async_trait]
impl RskConnection for FakeRsk {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.enter()?;
        Ok(self.block())
    }

    async fn call(&self, call: &LbcCall) -> Result<LbcCallResult, ChainError> {
        self.enter()?;
        match call {
            LbcCall::IsPegOutQuoteCompleted(hash) => Ok(LbcCallResult::Bool(
                self.completed
                    .lock()
                    .expect("completed mutex poisoned")
                    .contains(hash),
            )),
        }
    }

    async fn get_events(&self, filter: &EventFilter) -> Result<Vec<LbcEvent>, ChainError> {
        self.enter()?;
        let events = self.events.lock().expect("events mutex poisoned");
        Ok(events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }
}
