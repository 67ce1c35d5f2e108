mod availability;
mod conflict;
mod coverage;
mod error;
mod mutations;
mod queries;

pub use availability::{is_available_on, vacation_info_on};
pub use conflict::{find_location_conflict, find_time_conflict, TaskCandidate};
pub use coverage::missing_from_required;
pub use error::EngineError;
pub use mutations::{TaskInput, TaskUpdateOutcome, VacationDecision};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedEmployeeState = Arc<RwLock<EmployeeState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// One tenant's scheduling state: employees own their calendars, locations
/// and coverage rules are tenant-global.
pub struct Engine {
    pub employees: DashMap<Ulid, SharedEmployeeState>,
    pub locations: DashMap<Ulid, Location>,
    /// Coverage rules in definition order — reporting preserves it.
    pub coverage: RwLock<Vec<CoverageRule>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (task/vacation-request) id → employee id
    pub(super) entity_to_employee: DashMap<Ulid, Ulid>,
}

/// Apply an event directly to an EmployeeState (no locking — caller holds
/// the lock). Cross-employee task reassignment calls this once per side.
fn apply_to_employee(rs: &mut EmployeeState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::EmployeeUpdated { name, email, color, role, active, .. } => {
            rs.name = name.clone();
            rs.email = email.clone();
            rs.color = color.clone();
            rs.role = *role;
            rs.active = *active;
        }
        Event::TaskCreated {
            id,
            employee_id,
            location_id,
            title,
            start_date,
            end_date,
            window,
        } => {
            rs.insert_entry(Entry {
                id: *id,
                start_date: *start_date,
                end_date: *end_date,
                kind: EntryKind::Task {
                    title: title.clone(),
                    location_id: *location_id,
                    window: *window,
                },
            });
            entity_map.insert(*id, *employee_id);
        }
        Event::TaskUpdated {
            id,
            prev_employee_id,
            employee_id,
            location_id,
            title,
            start_date,
            end_date,
            window,
        } => {
            if rs.id == *prev_employee_id {
                rs.remove_entry(*id);
            }
            if rs.id == *employee_id {
                rs.remove_entry(*id);
                rs.insert_entry(Entry {
                    id: *id,
                    start_date: *start_date,
                    end_date: *end_date,
                    kind: EntryKind::Task {
                        title: title.clone(),
                        location_id: *location_id,
                        window: *window,
                    },
                });
            }
            entity_map.insert(*id, *employee_id);
        }
        Event::TaskDeleted { id, .. } => {
            rs.remove_entry(*id);
            entity_map.remove(id);
        }
        Event::VacationSubmitted {
            id,
            employee_id,
            range,
            kind,
            reason,
        } => {
            rs.requests.push(VacationRequest {
                id: *id,
                employee_id: *employee_id,
                range: *range,
                kind: *kind,
                reason: reason.clone(),
                status: RequestStatus::Pending,
                decided_by: None,
                decided_at: None,
                comment: None,
            });
            entity_map.insert(*id, *employee_id);
        }
        Event::VacationApproved {
            id,
            decided_by,
            decided_at,
            comment,
            ..
        } => {
            let block = rs.request_mut(*id).map(|req| {
                req.status = RequestStatus::Approved;
                req.decided_by = Some(*decided_by);
                req.decided_at = Some(*decided_at);
                req.comment = comment.clone();
                Entry {
                    id: req.id,
                    start_date: req.range.start,
                    end_date: Some(req.range.end),
                    kind: EntryKind::VacationBlock { kind: req.kind },
                }
            });
            if let Some(block) = block {
                rs.insert_entry(block);
            }
        }
        Event::VacationRejected {
            id,
            decided_by,
            decided_at,
            comment,
            ..
        } => {
            if let Some(req) = rs.request_mut(*id) {
                req.status = RequestStatus::Rejected;
                req.decided_by = Some(*decided_by);
                req.decided_at = Some(*decided_at);
                req.comment = comment.clone();
            }
        }
        Event::VacationDeleted { id, .. } => {
            rs.remove_request(*id);
            // Approved requests materialized a block under the same id.
            rs.remove_entry(*id);
            entity_map.remove(id);
        }
        // Employee/location/coverage lifecycle is handled at the map level
        Event::EmployeeCreated { .. }
        | Event::EmployeeDeleted { .. }
        | Event::LocationCreated { .. }
        | Event::LocationUpdated { .. }
        | Event::LocationDeleted { .. }
        | Event::CoverageRuleAdded { .. }
        | Event::CoverageRuleRemoved { .. } => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            employees: DashMap::new(),
            locations: DashMap::new(),
            coverage: RwLock::new(Vec::new()),
            wal_tx,
            notify,
            entity_to_employee: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::EmployeeCreated { id, name, email, color, role, active } => {
                let rs = EmployeeState::new(
                    *id,
                    name.clone(),
                    email.clone(),
                    color.clone(),
                    *role,
                    *active,
                );
                self.employees.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::EmployeeDeleted { id } => {
                if let Some((_, rs)) = self.employees.remove(id) {
                    let guard = rs.try_read().expect("replay: uncontended read");
                    for entry in &guard.entries {
                        self.entity_to_employee.remove(&entry.id);
                    }
                    for req in &guard.requests {
                        self.entity_to_employee.remove(&req.id);
                    }
                }
            }
            Event::LocationCreated { id, name, address, city }
            | Event::LocationUpdated { id, name, address, city } => {
                self.locations.insert(
                    *id,
                    Location {
                        id: *id,
                        name: name.clone(),
                        address: address.clone(),
                        city: city.clone(),
                    },
                );
            }
            Event::LocationDeleted { id } => {
                self.locations.remove(id);
                let mut rules = self.coverage.try_write().expect("replay: uncontended write");
                rules.retain(|r| r.location_id != *id);
            }
            Event::CoverageRuleAdded { id, location_id, weekday } => {
                let mut rules = self.coverage.try_write().expect("replay: uncontended write");
                rules.push(CoverageRule {
                    id: *id,
                    location_id: *location_id,
                    weekday: *weekday,
                });
            }
            Event::CoverageRuleRemoved { id } => {
                let mut rules = self.coverage.try_write().expect("replay: uncontended write");
                rules.retain(|r| r.id != *id);
            }
            Event::TaskUpdated { prev_employee_id, employee_id, .. }
                if prev_employee_id != employee_id =>
            {
                for eid in [prev_employee_id, employee_id] {
                    if let Some(entry) = self.employees.get(eid) {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_employee(&mut guard, event, &self.entity_to_employee);
                    }
                }
            }
            other => {
                if let Some(employee_id) = event_employee_id(other)
                    && let Some(entry) = self.employees.get(&employee_id) {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_employee(&mut guard, other, &self.entity_to_employee);
                    }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_employee(&self, id: &Ulid) -> Option<SharedEmployeeState> {
        self.employees.get(id).map(|e| e.value().clone())
    }

    pub fn get_employee_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_employee.get(entity_id).map(|e| *e.value())
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        employee_id: Ulid,
        rs: &mut EmployeeState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_employee(rs, event, &self.entity_to_employee);
        self.notify.send(employee_id, event);
        Ok(())
    }

    /// Lookup entity → employee, get employee state, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<EmployeeState>), EngineError> {
        let employee_id = self
            .get_employee_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_employee(&employee_id)
            .ok_or(EngineError::NotFound(employee_id))?;
        let guard = rs.write_owned().await;
        Ok((employee_id, guard))
    }

    /// Compact the WAL by rewriting it with only the events needed to
    /// recreate the current state. Vacation blocks are not emitted — they
    /// are re-materialized by replaying the approval events.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let employee_ids: Vec<Ulid> = self.employees.iter().map(|e| *e.key()).collect();
        for id in &employee_ids {
            let entry = match self.employees.get(id) {
                Some(e) => e,
                None => continue,
            };
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");
            events.push(Event::EmployeeCreated {
                id: guard.id,
                name: guard.name.clone(),
                email: guard.email.clone(),
                color: guard.color.clone(),
                role: guard.role,
                active: guard.active,
            });
        }

        for loc in self.locations.iter() {
            events.push(Event::LocationCreated {
                id: loc.id,
                name: loc.name.clone(),
                address: loc.address.clone(),
                city: loc.city.clone(),
            });
        }

        {
            let rules = self.coverage.read().await;
            for rule in rules.iter() {
                events.push(Event::CoverageRuleAdded {
                    id: rule.id,
                    location_id: rule.location_id,
                    weekday: rule.weekday,
                });
            }
        }

        for id in &employee_ids {
            let entry = match self.employees.get(id) {
                Some(e) => e,
                None => continue,
            };
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");

            for e in &guard.entries {
                if let EntryKind::Task { title, location_id, window } = &e.kind {
                    events.push(Event::TaskCreated {
                        id: e.id,
                        employee_id: guard.id,
                        location_id: *location_id,
                        title: title.clone(),
                        start_date: e.start_date,
                        end_date: e.end_date,
                        window: *window,
                    });
                }
            }

            for req in &guard.requests {
                events.push(Event::VacationSubmitted {
                    id: req.id,
                    employee_id: req.employee_id,
                    range: req.range,
                    kind: req.kind,
                    reason: req.reason.clone(),
                });
                match req.status {
                    RequestStatus::Pending => {}
                    RequestStatus::Approved => events.push(Event::VacationApproved {
                        id: req.id,
                        employee_id: req.employee_id,
                        decided_by: req.decided_by.unwrap_or(Ulid::nil()),
                        decided_at: req.decided_at.unwrap_or(0),
                        comment: req.comment.clone(),
                    }),
                    RequestStatus::Rejected => events.push(Event::VacationRejected {
                        id: req.id,
                        employee_id: req.employee_id,
                        decided_by: req.decided_by.unwrap_or(Ulid::nil()),
                        decided_at: req.decided_at.unwrap_or(0),
                        comment: req.comment.clone(),
                    }),
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the owning employee id from a single-owner event.
fn event_employee_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::TaskCreated { employee_id, .. }
        | Event::TaskUpdated { employee_id, .. }
        | Event::TaskDeleted { employee_id, .. }
        | Event::VacationSubmitted { employee_id, .. }
        | Event::VacationApproved { employee_id, .. }
        | Event::VacationRejected { employee_id, .. }
        | Event::VacationDeleted { employee_id, .. } => Some(*employee_id),
        Event::EmployeeUpdated { id, .. } => Some(*id),
        Event::EmployeeCreated { .. }
        | Event::EmployeeDeleted { .. }
        | Event::LocationCreated { .. }
        | Event::LocationUpdated { .. }
        | Event::LocationDeleted { .. }
        | Event::CoverageRuleAdded { .. }
        | Event::CoverageRuleRemoved { .. } => None,
    }
}
