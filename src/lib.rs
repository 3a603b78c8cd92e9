pub mod alloc {
    pub use ard_alloc::*;
}

pub mod log {
    pub use ard_log::*;
}

pub mod buffer_pool {
    pub mod prelude {
        pub use ard_alloc::prelude::*;
        pub use ard_buffer_pool::prelude::*;
    }

    pub use ard_buffer_pool::*;
}
