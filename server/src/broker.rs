//! The chat state machine driven by worker reactor completions.
//!
//! A broker instance lives on one worker thread. It parses each framed
//! message delivered in a receive slot and turns it into room-table updates
//! and slot-anchored writes. Room membership is the only state it shares
//! with other workers.

use std::os::fd::RawFd;
use std::sync::Arc;

use io_core::{DriverCtx, EventHandler};
use protocol_chat::{filter_chat_payload, join_room_id, parse_frame, Frame, MessageType};
use tracing::{debug, info, warn};

use crate::metrics;
use crate::rooms::RoomTable;

/// Emit a throughput stats line every this many chat messages.
const STATS_INTERVAL: u64 = 1000;

pub struct Broker {
    worker_id: usize,
    rooms: Arc<RoomTable>,
    messages_handled: u64,
}

impl Broker {
    pub fn new(worker_id: usize, rooms: Arc<RoomTable>) -> Self {
        Broker {
            worker_id,
            rooms,
            messages_handled: 0,
        }
    }

    fn handle_join(&mut self, ctx: &mut DriverCtx<'_>, fd: RawFd, idx: u16, payload: &[u8]) {
        let Some(room_id) = join_room_id(payload) else {
            warn!(fd, "malformed JOIN payload");
            metrics::FRAMES_REJECTED.increment();
            ctx.release(idx);
            return;
        };

        // The acceptor already placed the client in a starter room, so an
        // explicit JOIN is a move.
        match self.rooms.move_to(fd, room_id) {
            Ok(()) => {
                info!(fd, room_id, "client joined room");
                let ack = Frame::ack(&format!("Successfully joined session {room_id}"));
                ctx.reply(fd, idx, ack.as_bytes());
            }
            Err(e) => {
                warn!(fd, room_id, error = %e, "join rejected");
                let err = Frame::error(&format!("Failed to join session {room_id}"));
                ctx.reply(fd, idx, err.as_bytes());
            }
        }
    }

    fn handle_leave(&mut self, ctx: &mut DriverCtx<'_>, fd: RawFd, idx: u16) {
        if let Some(room_id) = self.rooms.leave(fd) {
            info!(fd, room_id, "client left room");
        }
        ctx.release(idx);
    }

    fn handle_chat(&mut self, ctx: &mut DriverCtx<'_>, fd: RawFd, idx: u16, payload: &[u8]) {
        metrics::MESSAGES_RECEIVED.increment();
        self.messages_handled += 1;
        if self.messages_handled % STATS_INTERVAL == 0 {
            info!(
                worker = self.worker_id,
                messages = self.messages_handled,
                "chat throughput"
            );
        }

        let filtered = filter_chat_payload(payload);
        if filtered.is_empty() {
            debug!(fd, "chat payload empty after filtering");
            metrics::FRAMES_REJECTED.increment();
            ctx.release(idx);
            return;
        }

        let Some(room_id) = self.rooms.room_of(fd) else {
            debug!(fd, "chat from client not in a room");
            ctx.release(idx);
            return;
        };

        let targets = self.rooms.recipients(room_id, fd);
        if targets.is_empty() {
            ctx.release(idx);
            return;
        }

        let out = Frame::chat(&filtered);
        ctx.broadcast(&targets, idx, out.as_bytes());
        metrics::BROADCASTS.increment();
    }
}

impl EventHandler for Broker {
    fn on_data(&mut self, ctx: &mut DriverCtx<'_>, fd: RawFd, idx: u16, data: &[u8]) {
        let frame = match parse_frame(data) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(fd, error = %e, "rejected frame");
                metrics::FRAMES_REJECTED.increment();
                ctx.release(idx);
                return;
            }
        };

        match frame.msg_type {
            MessageType::ClientJoin => self.handle_join(ctx, fd, idx, frame.payload),
            MessageType::ClientLeave => self.handle_leave(ctx, fd, idx),
            MessageType::ClientChat => self.handle_chat(ctx, fd, idx, frame.payload),
            other => {
                debug!(fd, msg_type = ?other, "unsupported message type");
                metrics::FRAMES_REJECTED.increment();
                let err = Frame::error("unsupported message type");
                ctx.reply(fd, idx, err.as_bytes());
            }
        }
    }

    fn on_disconnect(&mut self, fd: RawFd) {
        metrics::CONNECTIONS_CLOSED.increment();
        if let Some(room_id) = self.rooms.leave(fd) {
            info!(fd, room_id, "client disconnected");
        } else {
            debug!(fd, "unassigned client disconnected");
        }
    }
}
