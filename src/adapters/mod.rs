//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter     | Implements    | Connects to                    |
//! |-------------|---------------|--------------------------------|
//! | `kv_store`  | EventStore    | any `KvStore` (postcard blobs) |
//! | `memory_kv` | KvStore       | in-memory map                  |
//! | `sim_queue` | HostQueue     | scripted in-process host       |
//! | `log_sink`  | CommsObserver | `log` facade                   |

pub mod kv_store;
pub mod log_sink;
pub mod memory_kv;
pub mod sim_queue;
