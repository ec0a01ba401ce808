use async_trait::async_trait;
use callquote_core::domain::conversation::{
    CallbackRequest, ClosingReason, ConversationState, StateUpdate, TimeSlot,
};
use callquote_core::flows::{NodeKind, Stage};
use chrono::{Datelike, Duration, Timelike};

use super::{log_fallback, spoken_list, spoken_time, NodeContext, StageNode};
use crate::extraction::{BookingDecision, BookingReply, TimePreference};

pub struct BookingNode;

#[async_trait]
impl StageNode for BookingNode {
    fn kind(&self) -> NodeKind {
        NodeKind::Booking
    }

    async fn run(&self, state: &ConversationState, ctx: &NodeContext<'_>) -> StateUpdate {
        let reply = match ctx
            .extractor
            .classify_booking_reply(&ctx.system_context(state), state.latest_user_utterance())
            .await
        {
            Ok(reply) => reply,
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                BookingReply {
                    decision: BookingDecision::Unclear,
                    time_preference: TimePreference::default(),
                    wants_options: false,
                }
            }
        };

        match reply.decision {
            BookingDecision::Decline => return StateUpdate::close(ClosingReason::BookingDeclined),
            BookingDecision::Unclear => return reask(state),
            BookingDecision::Accept => {}
        }

        let picked = reply
            .time_preference
            .option_number
            .and_then(|number| number.checked_sub(1))
            .and_then(|index| state.offered_slots.get(index));
        if let Some(slot) = picked {
            return self.book(state, ctx, slot).await;
        }

        let now = ctx.clock.now();
        let end = now + Duration::days(i64::from(ctx.settings.booking_window_days));
        let slots = match ctx.tools.get_available_slots(&state.tenant_id, now, end).await {
            Ok(slots) => slots,
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                return StateUpdate::close(ClosingReason::BookingFailed);
            }
        };

        if reply.wants_options && reply.time_preference.is_empty() && !slots.is_empty() {
            let offered: Vec<TimeSlot> =
                slots.into_iter().take(ctx.settings.slot_offer_count).collect();
            let spoken: Vec<String> = offered.iter().map(|slot| spoken_time(&slot.start)).collect();
            return StateUpdate {
                offered_slots: Some(offered),
                ..StateUpdate::to(Stage::WaitingForTimeSlot).say(format!(
                    "I have {}. Which works best for you?",
                    spoken_list(&spoken, "or")
                ))
            };
        }

        match select_slot(&slots, &reply.time_preference) {
            Some(slot) => self.book(state, ctx, slot).await,
            None => StateUpdate::close(ClosingReason::NoAvailability).with_callback(CallbackRequest {
                phone: state.customer_phone.clone(),
                reason: ClosingReason::NoAvailability,
                note: format!(
                    "No open slots in the next {} days",
                    ctx.settings.booking_window_days
                ),
            }),
        }
    }
}

impl BookingNode {
    async fn book(
        &self,
        state: &ConversationState,
        ctx: &NodeContext<'_>,
        slot: &TimeSlot,
    ) -> StateUpdate {
        match ctx.tools.book_appointment(state, slot.start).await {
            Ok(booking) => StateUpdate {
                chosen_time: Some(slot.start),
                booking: Some(booking),
                offered_slots: Some(Vec::new()),
                ..StateUpdate::close(ClosingReason::BookingConfirmed)
            },
            Err(error) => {
                log_fallback(state, ctx, self.kind(), &error);
                StateUpdate { chosen_time: Some(slot.start), ..StateUpdate::close(ClosingReason::BookingFailed) }
            }
        }
    }
}

fn reask(state: &ConversationState) -> StateUpdate {
    if state.offered_slots.is_empty() {
        return StateUpdate::to(Stage::WaitingForBookingDecision)
            .say("Sorry, I didn't catch that. Would you like me to book your first visit?");
    }
    let spoken: Vec<String> =
        state.offered_slots.iter().map(|slot| spoken_time(&slot.start)).collect();
    StateUpdate::to(Stage::WaitingForTimeSlot)
        .say(format!("Which of those works best: {}?", spoken_list(&spoken, "or")))
}

/// Weekday and hour together, then weekday with part of day, then weekday,
/// then hour, then part of day, then the earliest slot.
pub fn select_slot<'a>(slots: &'a [TimeSlot], preference: &TimePreference) -> Option<&'a TimeSlot> {
    let on_day = |slot: &TimeSlot| preference.weekday.map_or(true, |day| slot.start.weekday() == day);
    let at_hour = |slot: &TimeSlot| preference.hour.map_or(true, |hour| slot.start.hour() == hour);
    let in_part = |slot: &TimeSlot| {
        preference.part_of_day.map_or(true, |part| part.contains_hour(slot.start.hour()))
    };

    slots
        .iter()
        .find(|slot| on_day(slot) && at_hour(slot) && in_part(slot))
        .or_else(|| slots.iter().find(|slot| on_day(slot) && in_part(slot)))
        .or_else(|| slots.iter().find(|slot| on_day(slot)))
        .or_else(|| slots.iter().find(|slot| at_hour(slot)))
        .or_else(|| slots.iter().find(|slot| in_part(slot)))
        .or_else(|| slots.first())
}
