pub mod clock;
pub mod collaborators;
pub mod engine;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod sweep;
pub mod wal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use collaborators::{LedgerPayments, PaymentLookup, PromoResolver, StaticPromos};
pub use engine::{
    AppliedDiscount, AvailabilityResult, Cancellation, DenialReason, EarlyCheckoutOutcome, Engine,
    EngineError, PriceQuote,
};
pub use model::{
    ApprovalStatus, Booking, BookingStatus, CancelActor, DateChangeRequest, DateRange, Discount,
    DiscountKind, EarlyCheckoutRecord, Event, Money, Ms, RoomInfo,
};
pub use notify::NotifyHub;
pub use policy::PolicyConfig;
pub use sweep::SweepReport;
