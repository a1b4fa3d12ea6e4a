use chrono::{Duration, Utc};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ticket_store::{
    ConcertId, ConcertStatus, InMemoryTicketStore, Money, NewConcert, ReservationId, SeatPool,
    Ticket, TicketId, TicketLedger, TicketStatus, TicketStore, UnitOfWork,
};

fn tickets(concert_id: ConcertId, seats: u32) -> Vec<Ticket> {
    (1..=seats)
        .map(|seat| Ticket {
            id: TicketId::new(i64::from(seat)),
            concert_id,
            seat_number: seat,
            price: Money::from_cents(10_000),
            status: TicketStatus::Available,
            reservation_id: None,
        })
        .collect()
}

fn new_concert(seats: u32) -> NewConcert {
    let starts_at = Utc::now() + Duration::days(30);
    NewConcert {
        title: "Bench Concert".into(),
        venue: "Hall".into(),
        description: String::new(),
        total_seats: seats,
        ticket_price: Money::from_cents(10_000),
        status: ConcertStatus::Upcoming,
        starts_at,
        ends_at: starts_at + Duration::hours(2),
    }
}

fn bench_seat_pool(c: &mut Criterion) {
    c.bench_function("seat_pool/reserve_until_sold_out_1000", |b| {
        b.iter(|| {
            let mut pool = SeatPool::new(1_000);
            while pool.try_reserve(1) {}
            pool
        });
    });
}

fn bench_ledger_claim(c: &mut Criterion) {
    let mut group = c.benchmark_group("ticket_ledger/claim_all");
    for seats in [100u32, 1_000, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(seats), &seats, |b, &seats| {
            let concert_id = ConcertId::new(1);
            b.iter(|| {
                let mut ledger = TicketLedger::new(concert_id, tickets(concert_id, seats));
                for n in 0..i64::from(seats) {
                    ledger.claim_seats(1, ReservationId::new(n + 1)).unwrap();
                }
                ledger
            });
        });
    }
    group.finish();
}

fn bench_memory_unit_of_work(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryTicketStore::new();
    let concert = rt
        .block_on(store.create_concert(new_concert(100)))
        .unwrap();

    c.bench_function("memory_store/reserve_and_roll_back", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut tx = store.begin(concert.id).await.unwrap();
                assert!(tx.try_reserve_seats(2).await.unwrap());
                let id = tx.next_reservation_id().await.unwrap();
                tx.claim_seats(2, id).await.unwrap();
                // dropped: rolled back
            });
        });
    });
}

criterion_group!(
    benches,
    bench_seat_pool,
    bench_ledger_claim,
    bench_memory_unit_of_work
);
criterion_main!(benches);
