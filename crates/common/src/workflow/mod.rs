//! Ticket workflow: policy, state machine, numbering, history and documents

pub mod clock;
pub mod documents;
pub mod history;
pub mod letter_number;
pub mod policy;
pub mod ticket_number;
pub mod tickets;

pub use clock::{Clock, FixedClock, SystemClock};
pub use documents::{DocumentManager, DocumentView, Upload};
pub use letter_number::{
    verify, LetterNumberGenerator, LetterRegistry, ParsedLetterNumber, RandomSuffix,
    RegisteredLetter, Verification,
};
pub use policy::TicketAction;
pub use tickets::{NewTicket, TicketChanges, TicketCommand, TicketDetail, TicketWorkflow};
