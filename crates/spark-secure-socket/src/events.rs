use std::sync::{Arc, mpsc};

use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedSender;

/// 通道向会话管理层发出的通知。
///
/// 致命转换时按 `StopRetry → Disconnected → InputShutdown` 的顺序各发一次。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SocketEvent {
    /// 停止自动重连。
    StopRetry,
    /// 连接已断开。
    Disconnected,
    /// 输入流已关闭。
    InputShutdown,
}

/// 断连时依次发出的事件序列。
pub const DISCONNECT_SEQUENCE: [SocketEvent; 3] = [
    SocketEvent::StopRetry,
    SocketEvent::Disconnected,
    SocketEvent::InputShutdown,
];

/// 事件接收端。
///
/// # 契约（What）
/// - 发射即遗忘：实现不得阻塞，也不向通道回传确认；
/// - 接收方已关闭时静默丢弃。
pub trait EventSink: Send + Sync {
    fn send(&self, event: SocketEvent);
}

impl EventSink for UnboundedSender<SocketEvent> {
    fn send(&self, event: SocketEvent) {
        let _ = UnboundedSender::send(self, event);
    }
}

impl EventSink for mpsc::Sender<SocketEvent> {
    fn send(&self, event: SocketEvent) {
        let _ = mpsc::Sender::send(self, event);
    }
}

/// 不关心事件时使用的空接收端。
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardEvents;

impl EventSink for DiscardEvents {
    fn send(&self, _event: SocketEvent) {}
}

/// 把事件记录在内存中，便于测试与诊断。
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<SocketEvent>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前已记录事件的快照。
    pub fn events(&self) -> Vec<SocketEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: SocketEvent) -> usize {
        self.events.lock().iter().filter(|seen| **seen == event).count()
    }
}

impl EventSink for RecordingSink {
    fn send(&self, event: SocketEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit_all(sink: &dyn EventSink) {
        for event in DISCONNECT_SEQUENCE {
            sink.send(event);
        }
    }

    #[test]
    fn tokio_sender_delivers_in_order() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        emit_all(&tx);
        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(received, DISCONNECT_SEQUENCE.to_vec());
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        emit_all(&tx);
    }

    #[test]
    fn recording_sink_counts_events() {
        let sink = RecordingSink::new();
        emit_all(&sink);
        sink.send(SocketEvent::Disconnected);
        assert_eq!(sink.count(SocketEvent::Disconnected), 2);
        assert_eq!(sink.events().len(), 4);
    }
}
