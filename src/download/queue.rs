//! 任务队列与结果收集器。
//!
//! 两者都基于 crossbeam 无界通道：通道本身保证每个元素只被一个接收方取走。

use std::collections::BTreeMap;

use crossbeam_channel as channel;
use tracing::debug;

/// 线程安全的 FIFO 任务队列。
///
/// 所有任务在工作线程启动前入队，因此 `try_pop` 返回 `None` 即表示工作完成，
/// 不会等待之后的 `push`。
pub struct TaskQueue<T> {
    tx: channel::Sender<T>,
    rx: channel::Receiver<T>,
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, item: T) {
        // 接收端由队列自身持有，发送不会失败
        let _ = self.tx.send(item);
    }

    pub fn try_pop(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for TaskQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let queue = Self::new();
        for item in iter {
            queue.push(item);
        }
        queue
    }
}

/// 各工作线程的结果汇集点。
///
/// `drain*` 消耗自身：只有在所有借用它的工作线程都已 join 之后才能调用。
pub struct ResultAggregator<R> {
    tx: channel::Sender<R>,
    rx: channel::Receiver<R>,
}

impl<R> ResultAggregator<R> {
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    pub fn push(&self, result: R) {
        let _ = self.tx.send(result);
    }

    pub fn drain(self) -> Vec<R> {
        self.rx.try_iter().collect()
    }
}

impl<K: Ord + std::fmt::Debug, V> ResultAggregator<(K, V)> {
    /// 按键排序汇总；重复键以后到达者为准。
    pub fn drain_into_map(self) -> BTreeMap<K, V> {
        let mut map = BTreeMap::new();
        for (key, value) in self.rx.try_iter() {
            if map.contains_key(&key) {
                debug!("duplicate result key {:?}, keeping the later one", key);
            }
            map.insert(key, value);
        }
        map
    }
}

impl<R> Default for ResultAggregator<R> {
    fn default() -> Self {
        Self::new()
    }
}
