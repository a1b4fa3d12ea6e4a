//! The ticket ledger: a concert's individually addressable seats.
//!
//! Claims are all-or-nothing and take the lowest free seat numbers first.
//! Every operation validates the whole request before touching a ticket, so a
//! rejected call leaves the ledger exactly as it was.

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

use crate::{ConcertId, ReservationId, StoreError, Ticket, TicketId, TicketStatus};

/// Reasons a ledger operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("requested {requested} tickets but only {available} are available")]
    Insufficient { requested: u32, available: u32 },

    #[error("ticket {0} does not belong to this concert")]
    UnknownTicket(TicketId),

    #[error("ticket {ticket} is {status} and not held by reservation {reservation}")]
    NotHeld {
        ticket: TicketId,
        reservation: ReservationId,
        status: TicketStatus,
    },
}

impl From<LedgerError> for StoreError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Insufficient {
                requested,
                available,
            } => StoreError::InsufficientTickets {
                requested,
                available,
            },
            other => StoreError::Invariant(other.to_string()),
        }
    }
}

/// In-memory ticket records for one concert.
#[derive(Debug, Clone)]
pub struct TicketLedger {
    concert_id: ConcertId,
    /// Sorted by seat number.
    tickets: Vec<Ticket>,
    positions: HashMap<TicketId, usize>,
    /// Positions of AVAILABLE tickets.
    available: BTreeSet<usize>,
}

impl TicketLedger {
    /// Builds a ledger from the concert's tickets.
    pub fn new(concert_id: ConcertId, mut tickets: Vec<Ticket>) -> Self {
        tickets.sort_by_key(|t| t.seat_number);
        let positions = tickets
            .iter()
            .enumerate()
            .map(|(pos, t)| (t.id, pos))
            .collect();
        let available = tickets
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TicketStatus::Available)
            .map(|(pos, _)| pos)
            .collect();

        Self {
            concert_id,
            tickets,
            positions,
            available,
        }
    }

    /// The concert this ledger belongs to.
    pub fn concert_id(&self) -> ConcertId {
        self.concert_id
    }

    /// Number of AVAILABLE tickets.
    pub fn available_count(&self) -> u32 {
        self.available.len() as u32
    }

    /// Number of tickets in the ledger.
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    /// Returns true if the concert has no tickets at all.
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    /// Looks up one ticket.
    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.positions.get(&id).map(|&pos| &self.tickets[pos])
    }

    /// Returns copies of the given tickets, skipping unknown ids.
    pub fn tickets(&self, ids: &[TicketId]) -> Vec<Ticket> {
        ids.iter().filter_map(|id| self.get(*id)).cloned().collect()
    }

    /// Marks `count` AVAILABLE tickets RESERVED for `reservation`.
    pub fn claim_seats(
        &mut self,
        count: u32,
        reservation: ReservationId,
    ) -> Result<Vec<TicketId>, LedgerError> {
        let available = self.available_count();
        if count == 0 || available < count {
            return Err(LedgerError::Insufficient {
                requested: count,
                available,
            });
        }

        let chosen: Vec<usize> = self.available.iter().take(count as usize).copied().collect();
        let mut claimed = Vec::with_capacity(chosen.len());
        for pos in chosen {
            self.available.remove(&pos);
            let ticket = &mut self.tickets[pos];
            ticket.status = TicketStatus::Reserved;
            ticket.reservation_id = Some(reservation);
            claimed.push(ticket.id);
        }
        Ok(claimed)
    }

    /// Returns tickets held by `reservation` (RESERVED or SOLD) to AVAILABLE.
    pub fn release(
        &mut self,
        reservation: ReservationId,
        ids: &[TicketId],
    ) -> Result<(), LedgerError> {
        let positions = self.held_positions(reservation, ids, |status| {
            matches!(status, TicketStatus::Reserved | TicketStatus::Sold)
        })?;

        for pos in positions {
            let ticket = &mut self.tickets[pos];
            ticket.status = TicketStatus::Available;
            ticket.reservation_id = None;
            self.available.insert(pos);
        }
        Ok(())
    }

    /// Moves tickets held by `reservation` from RESERVED to SOLD.
    pub fn mark_sold(
        &mut self,
        reservation: ReservationId,
        ids: &[TicketId],
    ) -> Result<(), LedgerError> {
        let positions =
            self.held_positions(reservation, ids, |status| status == TicketStatus::Reserved)?;

        for pos in positions {
            self.tickets[pos].status = TicketStatus::Sold;
        }
        Ok(())
    }

    /// Puts previously copied tickets back verbatim. Used to undo a unit of work.
    pub(crate) fn restore(&mut self, saved: Vec<Ticket>) {
        for ticket in saved {
            let Some(&pos) = self.positions.get(&ticket.id) else {
                continue;
            };
            if ticket.status == TicketStatus::Available {
                self.available.insert(pos);
            } else {
                self.available.remove(&pos);
            }
            self.tickets[pos] = ticket;
        }
    }

    fn held_positions(
        &self,
        reservation: ReservationId,
        ids: &[TicketId],
        allowed: impl Fn(TicketStatus) -> bool,
    ) -> Result<Vec<usize>, LedgerError> {
        ids.iter()
            .map(|id| {
                let pos = *self
                    .positions
                    .get(id)
                    .ok_or(LedgerError::UnknownTicket(*id))?;
                let ticket = &self.tickets[pos];
                if ticket.reservation_id != Some(reservation) || !allowed(ticket.status) {
                    return Err(LedgerError::NotHeld {
                        ticket: *id,
                        reservation,
                        status: ticket.status,
                    });
                }
                Ok(pos)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Money;

    fn ledger(seats: u32) -> TicketLedger {
        let concert_id = ConcertId::new(1);
        // Insert in reverse to check the ledger sorts by seat number.
        let tickets = (1..=seats)
            .rev()
            .map(|seat| Ticket {
                id: TicketId::new(i64::from(seat) * 10),
                concert_id,
                seat_number: seat,
                price: Money::from_cents(5_000),
                status: TicketStatus::Available,
                reservation_id: None,
            })
            .collect();
        TicketLedger::new(concert_id, tickets)
    }

    #[test]
    fn claim_takes_lowest_seat_numbers() {
        let mut ledger = ledger(5);
        let res = ReservationId::new(1);

        let claimed = ledger.claim_seats(2, res).unwrap();

        assert_eq!(claimed, vec![TicketId::new(10), TicketId::new(20)]);
        assert_eq!(ledger.available_count(), 3);
        let ticket = ledger.get(TicketId::new(10)).unwrap();
        assert_eq!(ticket.status, TicketStatus::Reserved);
        assert_eq!(ticket.reservation_id, Some(res));
    }

    #[test]
    fn claim_is_all_or_nothing() {
        let mut ledger = ledger(2);

        let err = ledger.claim_seats(3, ReservationId::new(1)).unwrap_err();

        assert_eq!(
            err,
            LedgerError::Insufficient {
                requested: 3,
                available: 2
            }
        );
        assert_eq!(ledger.available_count(), 2);
        assert!(ledger.tickets(&[TicketId::new(10), TicketId::new(20)])
            .iter()
            .all(|t| t.status == TicketStatus::Available && t.reservation_id.is_none()));
    }

    #[test]
    fn concurrent_claims_never_share_a_ticket() {
        let mut ledger = ledger(4);
        let a = ledger.claim_seats(2, ReservationId::new(1)).unwrap();
        let b = ledger.claim_seats(2, ReservationId::new(2)).unwrap();

        assert!(a.iter().all(|id| !b.contains(id)));
        assert!(ledger.claim_seats(1, ReservationId::new(3)).is_err());
    }

    #[test]
    fn release_returns_tickets_to_available() {
        let mut ledger = ledger(3);
        let res = ReservationId::new(7);
        let claimed = ledger.claim_seats(2, res).unwrap();

        ledger.release(res, &claimed).unwrap();

        assert_eq!(ledger.available_count(), 3);
        let ticket = ledger.get(claimed[0]).unwrap();
        assert_eq!(ticket.status, TicketStatus::Available);
        assert_eq!(ticket.reservation_id, None);
        // Freed seats are claimed again first.
        assert_eq!(ledger.claim_seats(1, ReservationId::new(8)).unwrap(), vec![claimed[0]]);
    }

    #[test]
    fn release_by_wrong_reservation_is_refused_without_changes() {
        let mut ledger = ledger(3);
        let owner = ReservationId::new(1);
        let claimed = ledger.claim_seats(2, owner).unwrap();

        let err = ledger.release(ReservationId::new(2), &claimed).unwrap_err();

        assert!(matches!(err, LedgerError::NotHeld { .. }));
        assert_eq!(ledger.available_count(), 1);
    }

    #[test]
    fn double_release_is_refused() {
        let mut ledger = ledger(2);
        let res = ReservationId::new(1);
        let claimed = ledger.claim_seats(1, res).unwrap();
        ledger.release(res, &claimed).unwrap();

        assert!(ledger.release(res, &claimed).is_err());
        assert_eq!(ledger.available_count(), 2);
    }

    #[test]
    fn mark_sold_requires_reserved() {
        let mut ledger = ledger(2);
        let res = ReservationId::new(1);
        let claimed = ledger.claim_seats(1, res).unwrap();

        ledger.mark_sold(res, &claimed).unwrap();
        assert_eq!(ledger.get(claimed[0]).unwrap().status, TicketStatus::Sold);

        // Already sold.
        assert!(ledger.mark_sold(res, &claimed).is_err());
        // Sold tickets can still be released by their owner.
        ledger.release(res, &claimed).unwrap();
        assert_eq!(ledger.available_count(), 2);
    }

    #[test]
    fn unknown_ticket_is_an_invariant_violation() {
        let mut ledger = ledger(1);
        let err = ledger
            .mark_sold(ReservationId::new(1), &[TicketId::new(999)])
            .unwrap_err();
        assert!(matches!(StoreError::from(err), StoreError::Invariant(_)));
    }

    #[test]
    fn restore_undoes_a_claim() {
        let mut ledger = ledger(3);
        let saved = ledger.tickets(&[TicketId::new(10)]);
        ledger.claim_seats(1, ReservationId::new(1)).unwrap();

        ledger.restore(saved);

        assert_eq!(ledger.available_count(), 3);
        assert_eq!(
            ledger.get(TicketId::new(10)).unwrap().status,
            TicketStatus::Available
        );
    }
}
