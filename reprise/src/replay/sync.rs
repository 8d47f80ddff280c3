//! Fence and queue synchronization.
//!
//! The captured API lets a queue wait on a fence value no producer has
//! signaled yet. The driver copes on its own; what must be rebuilt on the
//! host is the order in which the *application* observed completions. Two
//! cooperating structures do that: each fence keeps waiters sorted by
//! threshold value, and each queue keeps a FIFO of its not-yet-resolved
//! waits and signals. A signal that reaches a fence drains every waiter
//! whose threshold it covers; a queue whose head wait resolves drains
//! forward, handing deferred signals back to their fences, transitively.

use std::ops::Bound;
use std::time::Duration;

use tracing::{error, trace_span, warn};

use crate::error::result_code;
use crate::event::HostEvent;
use crate::object::{ExtraInfo, FenceInfo, FenceRef, QueueSyncEvent};
use crate::types::{ApiResult, HandleId};

use super::Replayer;

/// Capture id the diagnostics attribute a fence reference to.
fn fence_target_id(fence: FenceRef) -> HandleId {
    match fence {
        FenceRef::Captured(id) | FenceRef::QueueSync(id) => id,
    }
}

impl Replayer {
    // --- overrides --------------------------------------------------------

    pub fn create_fence(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        initial_value: u64,
        fence_id: HandleId,
    ) -> ApiResult {
        let Some(device) = self.object_or_warn(device_id, "create_fence") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.create_fence(device, initial_value);
        let replay_result = result_code(&result);

        if let Ok(fence) = result {
            let record = self.objects.insert(fence_id, fence);
            record.extra_info = Some(ExtraInfo::Fence(FenceInfo {
                last_signaled_value: initial_value,
                ..FenceInfo::default()
            }));
        }

        self.check_replay_result("create_fence", capture_result, replay_result);
        replay_result
    }

    pub fn command_queue_signal(
        &mut self,
        queue_id: HandleId,
        capture_result: ApiResult,
        fence_id: HandleId,
        value: u64,
    ) -> ApiResult {
        if capture_result.is_failure() {
            // Skip fence operations that failed at capture, in case they
            // succeed on replay.
            warn!(
                "ignoring command queue signal operation that failed at capture with result {}",
                capture_result
            );
            return capture_result;
        }

        let Some(queue) = self.object_or_warn(queue_id, "command_queue_signal") else {
            return ApiResult::FAIL;
        };
        let Some(fence) = self.object_or_warn(fence_id, "command_queue_signal") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.queue_signal(queue, fence, value);
        let replay_result = result_code(&result);

        if result.is_ok() {
            self.process_queue_signal(queue_id, FenceRef::Captured(fence_id), value);
        }

        self.check_replay_result("command_queue_signal", capture_result, replay_result);
        replay_result
    }

    pub fn command_queue_wait(
        &mut self,
        queue_id: HandleId,
        capture_result: ApiResult,
        fence_id: HandleId,
        value: u64,
    ) -> ApiResult {
        if capture_result.is_failure() {
            // Skip fence operations that failed at capture, in case they
            // succeed on replay.
            warn!(
                "ignoring command queue wait operation that failed at capture with result {}",
                capture_result
            );
            return capture_result;
        }

        let Some(queue) = self.object_or_warn(queue_id, "command_queue_wait") else {
            return ApiResult::FAIL;
        };
        let Some(fence) = self.object_or_warn(fence_id, "command_queue_wait") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.queue_wait(queue, fence, value);
        let replay_result = result_code(&result);

        if result.is_ok() {
            self.process_queue_wait(queue_id, fence_id, value);
        }

        self.check_replay_result("command_queue_wait", capture_result, replay_result);
        replay_result
    }

    pub fn fence_signal(
        &mut self,
        fence_id: HandleId,
        capture_result: ApiResult,
        value: u64,
    ) -> ApiResult {
        if capture_result.is_failure() {
            // Skip fence operations that failed at capture, in case they
            // succeed on replay.
            warn!(
                "ignoring fence signal operation that failed at capture with result {}",
                capture_result
            );
            return capture_result;
        }

        let Some(fence) = self.object_or_warn(fence_id, "fence_signal") else {
            return ApiResult::FAIL;
        };

        let result = self.driver.fence_signal(fence, value);
        let replay_result = result_code(&result);

        if result.is_ok() {
            self.process_fence_signal(FenceRef::Captured(fence_id), value);
        }

        self.check_replay_result("fence_signal", capture_result, replay_result);
        replay_result
    }

    /// Returns the capture-time completed value, stalling first when replay
    /// has not caught up to it. Determinism wants the application to see
    /// the value it saw at capture, not whatever the replay driver is at.
    pub fn fence_get_completed_value(&mut self, fence_id: HandleId, capture_result: u64) -> u64 {
        let Some(fence) = self.object_or_warn(fence_id, "fence_get_completed_value") else {
            return capture_result;
        };

        let replay_result = self.driver.fence_completed_value(fence);

        if self.objects.get(fence_id).and_then(|r| r.fence_info()).is_none() {
            self.fatal_missing_info("fence", fence_id);
            return capture_result;
        }

        if capture_result > replay_result {
            // Replay is behind capture; wait before any new work is issued
            // that may depend on completions that have not occurred yet.
            let event = self.events.get(HandleId::INTERNAL, true);
            if self
                .driver
                .fence_set_event_on_completion(fence, capture_result, &event)
                .is_ok()
            {
                let timeout = Some(self.options.wait_timeout);
                self.wait_event(&event, FenceRef::Captured(fence_id), timeout);
            }
        }

        capture_result
    }

    pub fn fence_set_event_on_completion(
        &mut self,
        fence_id: HandleId,
        capture_result: ApiResult,
        value: u64,
        event_id: HandleId,
    ) -> ApiResult {
        if capture_result.is_failure() {
            // Skip fence operations that failed at capture, in case they
            // succeed on replay.
            warn!(
                "ignoring set-event-on-completion operation that failed at capture with result {}",
                capture_result
            );
            return capture_result;
        }

        let Some(fence) = self.object_or_warn(fence_id, "fence_set_event_on_completion") else {
            return ApiResult::FAIL;
        };

        let event = self.events.get(event_id, true);
        let result = self.driver.fence_set_event_on_completion(fence, value, &event);
        let replay_result = result_code(&result);

        if result.is_ok() {
            let timeout = Some(self.options.wait_timeout);
            let Some(state) = self.objects.get_mut(fence_id).and_then(|r| r.fence_info_mut())
            else {
                self.fatal_missing_info("fence", fence_id);
                return replay_result;
            };

            if value <= state.last_signaled_value {
                // Already signaled; the wait the application performed at
                // capture resolves immediately.
                self.wait_event(&event, FenceRef::Captured(fence_id), timeout);
            } else {
                state
                    .waiting_objects
                    .entry(value)
                    .or_default()
                    .wait_events
                    .push(event);
            }
        }

        replay_result
    }

    pub fn execute_command_lists(&mut self, queue_id: HandleId, lists: &[HandleId]) {
        let Some(queue) = self.object_or_warn(queue_id, "execute_command_lists") else {
            return;
        };
        let resolved: Vec<_> = lists
            .iter()
            .filter_map(|&id| self.object_or_warn(id, "execute_command_lists"))
            .collect();

        self.driver.execute_command_lists(queue, &resolved);

        if !self.options.sync_queue_submissions || lists.is_empty() {
            return;
        }

        let Some(record) = self.objects.get_mut(queue_id) else {
            return;
        };
        let Some(queue_info) = record.queue_info_mut() else {
            self.fatal_missing_info("command queue", queue_id);
            return;
        };
        let Some(sync) = queue_info.sync.as_mut() else {
            error!("no synchronization objects are available for the queue submission sync option");
            return;
        };

        sync.value += 1;
        let value = sync.value;
        let fence = sync.fence;
        let event = sync.event.clone();
        let pending_empty = queue_info.pending_events.is_empty();

        let _ = self.driver.queue_signal(queue, fence, value);
        event.reset();
        let _ = self.driver.fence_set_event_on_completion(fence, value, &event);

        if pending_empty {
            // No outstanding waits; lockstep with the submission right away.
            event.wait(None);
        } else {
            // The sync signal will not be reached until the outstanding
            // waits resolve; order it behind them on the queue.
            let Some(queue_info) = self
                .objects
                .get_mut(queue_id)
                .and_then(|r| r.queue_info_mut())
            else {
                return;
            };
            let Some(sync) = queue_info.sync.as_mut() else {
                return;
            };
            sync.fence_info
                .waiting_objects
                .entry(value)
                .or_default()
                .wait_events
                .push(event);
            queue_info.pending_events.push_back(QueueSyncEvent {
                is_wait: false,
                is_signaled: false,
                fence: FenceRef::QueueSync(queue_id),
                value,
            });
        }
    }

    pub fn enqueue_make_resident(
        &mut self,
        device_id: HandleId,
        capture_result: ApiResult,
        objects: &[HandleId],
        fence_id: Option<HandleId>,
        value: u64,
    ) -> ApiResult {
        let Some(device) = self.object_or_warn(device_id, "enqueue_make_resident") else {
            return ApiResult::FAIL;
        };
        let resolved: Vec<_> = objects
            .iter()
            .filter_map(|&id| self.object_or_warn(id, "enqueue_make_resident"))
            .collect();
        let fence = self.resolve(fence_id);

        let result = self
            .driver
            .enqueue_make_resident(device, &resolved, fence, value);
        let replay_result = result_code(&result);

        if result.is_ok() {
            if let Some(fence_id) = fence_id {
                self.process_fence_signal(FenceRef::Captured(fence_id), value);
            }
        }

        self.check_replay_result("enqueue_make_resident", capture_result, replay_result);
        replay_result
    }

    // --- state machine ----------------------------------------------------

    /// A producer signaled `fence` on a queue with nothing pending, or the
    /// queue drained down to the signal. With pending entries ahead of it,
    /// the signal is deferred instead (the FIFO preserves submission order).
    pub(crate) fn process_queue_signal(&mut self, queue_id: HandleId, fence: FenceRef, value: u64) {
        let Some(queue_info) = self
            .objects
            .get_mut(queue_id)
            .and_then(|r| r.queue_info_mut())
        else {
            self.fatal_missing_info("command queue", queue_id);
            return;
        };

        if !queue_info.pending_events.is_empty() {
            queue_info.pending_events.push_back(QueueSyncEvent {
                is_wait: false,
                is_signaled: false,
                fence,
                value,
            });
            return;
        }

        self.process_fence_signal(fence, value);
    }

    /// Registers a queue wait that no signal has satisfied yet; a wait at
    /// or below the fence's signaled value is already resolved.
    pub(crate) fn process_queue_wait(&mut self, queue_id: HandleId, fence_id: HandleId, value: u64) {
        let Some(last_signaled) = self
            .objects
            .get(fence_id)
            .and_then(|r| r.fence_info())
            .map(|f| f.last_signaled_value)
        else {
            self.fatal_missing_info("fence", fence_id);
            return;
        };
        if value <= last_signaled {
            return;
        }

        let Some(queue_info) = self
            .objects
            .get_mut(queue_id)
            .and_then(|r| r.queue_info_mut())
        else {
            self.fatal_missing_info("command queue", queue_id);
            return;
        };
        // Signals appended behind this entry stay deferred until it drains.
        queue_info.pending_events.push_back(QueueSyncEvent {
            is_wait: true,
            is_signaled: false,
            fence: FenceRef::Captured(fence_id),
            value,
        });

        if let Some(state) = self.objects.get_mut(fence_id).and_then(|r| r.fence_info_mut()) {
            state
                .waiting_objects
                .entry(value)
                .or_default()
                .wait_queues
                .push(queue_id);
        }
    }

    /// Advances `fence` to `value`, resolving every waiter with a threshold
    /// in `(last_signaled_value, value]` in ascending order: recorded
    /// events are waited on so host-visible completions fire in capture
    /// order, then each waiting queue is drained.
    pub(crate) fn process_fence_signal(&mut self, fence: FenceRef, value: u64) {
        let _span = trace_span!("process_fence_signal", value).entered();
        let timeout = Some(self.options.wait_timeout);

        let Some(state) = self.fence_state_mut(fence) else {
            self.fatal_missing_info("fence", fence_target_id(fence));
            return;
        };

        // Detach the covered sub-range before draining it; draining can
        // re-enter this fence through a deferred signal.
        let lo = state.last_signaled_value;
        let keys: Vec<u64> = state
            .waiting_objects
            .range((Bound::Excluded(lo), Bound::Included(value)))
            .map(|(&key, _)| key)
            .collect();
        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(waiters) = state.waiting_objects.remove(&key) {
                drained.push((key, waiters));
            }
        }

        for (key, waiters) in drained {
            for event in &waiters.wait_events {
                self.wait_event(event, fence, timeout);
            }
            for queue_id in waiters.wait_queues {
                self.signal_waiting_queue(queue_id, fence, key);
            }
        }

        if let Some(state) = self.fence_state_mut(fence) {
            // A nested drain may already have advanced past `value`.
            state.last_signaled_value = state.last_signaled_value.max(value);
        }
    }

    /// A wait this queue had pending on `fence` at `value` is satisfied;
    /// drain the FIFO until an unsatisfied wait blocks the head, handing
    /// deferred signals back to their fences.
    pub(crate) fn signal_waiting_queue(&mut self, queue_id: HandleId, fence: FenceRef, value: u64) {
        {
            let Some(queue_info) = self
                .objects
                .get_mut(queue_id)
                .and_then(|r| r.queue_info_mut())
            else {
                return;
            };
            for entry in queue_info.pending_events.iter_mut() {
                if entry.is_wait && entry.fence == fence && entry.value == value {
                    entry.is_signaled = true;
                }
            }
        }

        self.drain_queue(queue_id);
    }

    /// Pops the queue's FIFO forward: satisfied waits drop, deferred
    /// signals are handed to their fences, an unsatisfied wait stops the
    /// walk.
    pub(crate) fn drain_queue(&mut self, queue_id: HandleId) {
        loop {
            let next = {
                let Some(queue_info) = self
                    .objects
                    .get_mut(queue_id)
                    .and_then(|r| r.queue_info_mut())
                else {
                    return;
                };
                match queue_info.pending_events.front().copied() {
                    None => break,
                    Some(entry) if entry.is_wait && !entry.is_signaled => break,
                    Some(entry) => {
                        queue_info.pending_events.pop_front();
                        entry
                    }
                }
            };
            if !next.is_wait {
                self.process_fence_signal(next.fence, next.value);
            }
        }
    }

    fn fence_state_mut(&mut self, fence: FenceRef) -> Option<&mut FenceInfo> {
        match fence {
            FenceRef::Captured(id) => self.objects.get_mut(id)?.fence_info_mut(),
            FenceRef::QueueSync(queue_id) => self
                .objects
                .get_mut(queue_id)?
                .queue_info_mut()?
                .sync
                .as_mut()
                .map(|sync| &mut sync.fence_info),
        }
    }

    /// Bounded wait on a host event; overruns are survivable and logged.
    pub(crate) fn wait_event(&self, event: &HostEvent, fence: FenceRef, timeout: Option<Duration>) {
        if !event.wait(timeout) {
            warn!(
                "wait operation timed out for fence object {} synchronization",
                fence_target_id(fence)
            );
        }
    }

    /// Blocks until every live queue drains. Run before teardown so no
    /// in-flight GPU work outlives the records backing it. Unbounded.
    pub(crate) fn wait_idle(&mut self) {
        let _span = trace_span!("wait_idle").entered();

        let queue_ids: Vec<HandleId> = self
            .objects
            .ids()
            .filter(|&id| {
                self.objects
                    .get(id)
                    .map_or(false, |r| matches!(r.extra_info, Some(ExtraInfo::CommandQueue(_))))
            })
            .collect();

        for queue_id in queue_ids {
            let event = self.events.get(HandleId::INTERNAL, true);
            let Some(record) = self.objects.get_mut(queue_id) else {
                continue;
            };
            let queue = record.object;
            let Some(queue_info) = record.queue_info_mut() else {
                continue;
            };

            if let Some(sync) = queue_info.sync.as_mut() {
                // The sync option already gave this queue a fence.
                sync.value += 1;
                let value = sync.value;
                let fence = sync.fence;
                if self.driver.queue_signal(queue, fence, value).is_ok()
                    && self
                        .driver
                        .fence_set_event_on_completion(fence, value, &event)
                        .is_ok()
                {
                    event.wait(None);
                }
            } else {
                // Signal and wait on a temporary fence from the parent device.
                let Ok(device) = self.driver.queue_device(queue) else {
                    continue;
                };
                let Ok(fence) = self.driver.create_fence(device, 0) else {
                    continue;
                };
                if self.driver.queue_signal(queue, fence, 1).is_ok()
                    && self.driver.fence_set_event_on_completion(fence, 1, &event).is_ok()
                {
                    event.wait(None);
                }
                self.driver.release(fence);
            }
        }
    }
}
