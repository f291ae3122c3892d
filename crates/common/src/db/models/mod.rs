//! SeaORM entity models
//!
//! Database entities for SiTeJo

mod access_token;
mod document;
mod ticket;
mod ticket_history;
mod user;

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
    UserRole,
};

pub use access_token::{
    Entity as AccessTokenEntity,
    Model as AccessToken,
    ActiveModel as AccessTokenActiveModel,
    Column as AccessTokenColumn,
};

pub use ticket::{
    Entity as TicketEntity,
    Model as Ticket,
    ActiveModel as TicketActiveModel,
    Column as TicketColumn,
    TicketCategory,
    TicketPriority,
    TicketStatus,
};

pub use document::{
    Entity as DocumentEntity,
    Model as Document,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
    DocumentType,
};

pub use ticket_history::{
    Entity as TicketHistoryEntity,
    Model as TicketHistory,
    ActiveModel as TicketHistoryActiveModel,
    Column as TicketHistoryColumn,
    HistoryAction,
};
