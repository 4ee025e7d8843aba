//! Entry point for records arriving on the input socket.
//!
//! Every datagram is decoded, checked against the loggable level, passed
//! through flow control and, if admitted, inserted into the buffer.  When
//! flow control reports lines dropped in an earlier window, a `LOGLIMIT`
//! warning is inserted just before the admitted record.

use crate::buffer::LogBuffer;
use crate::flow_control::{FlowControl, FlowSwitches, FlowVerdict};
use crate::log_entry::{LogEntry, LogLevel};
use crate::properties::Properties;
use crate::protocol::record;
use std::sync::Arc;

pub const DROP_MARKER_TAG: &str = "LOGLIMIT";

pub struct LogCollector {
    buffer: Arc<LogBuffer>,
    flow: Arc<FlowControl>,
    props: Arc<Properties>,
}

impl LogCollector {
    pub fn new(buffer: Arc<LogBuffer>, flow: Arc<FlowControl>, props: Arc<Properties>) -> Self {
        LogCollector {
            buffer,
            flow,
            props,
        }
    }

    /// Handle one raw datagram.  Returns the bytes stored for it.
    pub fn on_datagram(&self, data: &[u8]) -> usize {
        match record::decode(data) {
            Ok(entry) => self.collect(entry),
            Err(e) => {
                log::debug!("Discarding malformed record ({} bytes): {}", data.len(), e);
                0
            }
        }
    }

    pub fn collect(&self, entry: LogEntry) -> usize {
        if !self
            .props
            .is_loggable(entry.domain, &entry.tag, entry.level)
        {
            return 0;
        }

        let switches = FlowSwitches {
            process: self.props.is_process_flowctrl_on(),
            domain: self.props.is_domain_flowctrl_on(),
            debug: self.props.is_debug_on(),
        };
        match self.flow.check(&entry, switches) {
            FlowVerdict::Drop => {
                self.buffer.count_dropped(entry.log_type, entry.domain, 1);
                0
            }
            FlowVerdict::Admit { dropped } => {
                if dropped > 0 {
                    self.buffer.insert(drop_marker(&entry, dropped));
                }
                self.buffer.insert(entry)
            }
        }
    }
}

fn drop_marker(entry: &LogEntry, dropped: u64) -> LogEntry {
    LogEntry {
        level: LogLevel::Warn,
        tag: DROP_MARKER_TAG.to_string(),
        content: format!("{} line(s) dropped!", dropped),
        ..entry.clone()
    }
}
