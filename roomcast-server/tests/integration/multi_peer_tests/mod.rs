pub mod test_new_producer_fan_out;
pub mod test_room_retention;
