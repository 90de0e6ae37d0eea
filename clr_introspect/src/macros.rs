/// Generate accessors for fields of a record decoded from a
/// `bytes: OwnedBytes` member.
///
/// `name: {Type, byte_range}` decodes `Type` from the byte range.
/// `name: {Type, byte_range, BIT_FIELD}` decodes the word at the byte
/// range as `Type`, then extracts the given [`BitField`](crate::BitField).
///
/// For each field, `<name>_location()` returns the address range
/// the field was read from.
#[macro_export]
macro_rules! unpack_fields {
    (
        $name:ident: {$ty:ty, $byte_range:expr}
    ) => {
        ::paste::paste! {
            pub fn [< $name _location >](
                &self,
            ) -> ::std::ops::Range<::memory_reader::Pointer> {
                self.bytes.subrange($byte_range).ptr_range()
            }
        }

        pub fn $name(&self) -> Result<$ty, $crate::Error> {
            Ok(self.bytes.subrange($byte_range).unpack::<$ty>()?)
        }
    };

    (
        $name:ident: {$ty:ty, $byte_range:expr, $bit_field:expr}
    ) => {
        ::paste::paste! {
            pub fn [< $name _location >](
                &self,
            ) -> ::std::ops::Range<::memory_reader::Pointer> {
                self.bytes.subrange($byte_range).ptr_range()
            }
        }

        pub fn $name(&self) -> Result<$ty, $crate::Error> {
            let word = self.bytes.subrange($byte_range).unpack::<$ty>()?;
            Ok(($bit_field).decode(word as u64) as $ty)
        }
    };

    (
        $(
            $name:ident: {$ty:ty, $byte_range:expr $(, $bit_field:expr )?}
        ),* $(,)?
    ) => {
        $(
            $crate::unpack_fields!{$name: {$ty, $byte_range $(, $bit_field)? } }
        )*
    };
}
