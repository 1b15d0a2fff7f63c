mod month;

pub use month::{add_calendar_months, CalendarMonth, MonthParseError};
