pub mod booking;
pub mod city;
pub mod houseboat;
pub mod package;
pub mod payment;
pub mod transport;
pub mod user;

pub use booking::{Booking, BookingRow, BookingStatus, PaymentStatus};
pub use city::City;
pub use houseboat::{Deck, Houseboat, HouseboatRow};
pub use package::{Package, PackageOrder, PackageOrderRow, PackageRow};
pub use payment::{PaymentTarget, PaymentTransaction};
pub use transport::{SeatMap, TransportUnit};
pub use user::{User, UserProfile};
