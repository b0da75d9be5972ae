//! Transaction devices built on the shared request/retry loop.
//!
//! | Device        | Operations                         | Chain        |
//! |---------------|------------------------------------|--------------|
//! | `handpay`     | request, keyed_off                 | blocking     |
//! | `voucher`     | issue, redeem, commit              | blocking     |
//! | `progressive` | hit (deadline), commit             | blocking     |
//! | `id_reader`   | validate (deadline, offline match) | blocking     |
//! | `gat`         | push_verification_result           | worker thread|
//! | `download`    | push_status                        | worker thread|

pub mod download;
pub mod gat;
pub mod handpay;
pub mod id_reader;
pub mod progressive;
pub mod voucher;

pub use download::DownloadDevice;
pub use gat::GatDevice;
pub use handpay::HandpayDevice;
pub use id_reader::{IdReaderDevice, IdTypePattern, IdValidation};
pub use progressive::{AwardSource, ProgressiveAward, ProgressiveDevice};
pub use voucher::{VoucherAuthorization, VoucherDevice};
